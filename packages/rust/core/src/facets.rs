//! Facet space generation: the cross product of facet values as shards.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use facetharvest_shared::{BatchWindow, FacetDimension, ShardDescriptor, ShardFacet, ShardKey};

/// Enumerate every combination of facet values, first dimension outermost.
///
/// With `history`, shards are reordered by descending prior yield. Ties keep
/// the default order; shards absent from the history follow in default
/// order. Ranks always reflect the returned order.
pub fn generate_shards(
    dimensions: &[FacetDimension],
    history: Option<&BTreeMap<ShardKey, usize>>,
) -> Vec<ShardDescriptor> {
    if dimensions.is_empty() {
        return Vec::new();
    }

    let mut combos: Vec<Vec<ShardFacet>> = vec![Vec::new()];
    for dimension in dimensions {
        combos = combos
            .into_iter()
            .flat_map(|prefix| {
                dimension.values.iter().map(move |value| {
                    let mut facets = prefix.clone();
                    facets.push(ShardFacet {
                        dimension: dimension.name.clone(),
                        api_filter: dimension.api_filter.clone(),
                        page_param: dimension.page_param.clone(),
                        code: value.code.clone(),
                        label: value.label.clone(),
                    });
                    facets
                })
            })
            .collect();
    }

    let shards: Vec<ShardDescriptor> = combos
        .into_iter()
        .enumerate()
        .map(|(rank, facets)| ShardDescriptor::new(rank, facets))
        .collect();

    match history {
        Some(history) if !history.is_empty() => prioritize(shards, history),
        _ => shards,
    }
}

fn prioritize(
    shards: Vec<ShardDescriptor>,
    history: &BTreeMap<ShardKey, usize>,
) -> Vec<ShardDescriptor> {
    let (mut seen, unseen): (Vec<_>, Vec<_>) = shards
        .into_iter()
        .partition(|s| history.contains_key(&s.key));

    // Stable sort keeps default order among equal yields.
    seen.sort_by_key(|s| Reverse(history.get(&s.key).copied().unwrap_or(0)));

    seen.into_iter()
        .chain(unseen)
        .enumerate()
        .map(|(rank, shard)| ShardDescriptor { rank, ..shard })
        .collect()
}

/// Restrict a ranked plan to a batch window; `None` keeps every shard.
pub fn select_window(
    shards: Vec<ShardDescriptor>,
    window: Option<BatchWindow>,
) -> Vec<ShardDescriptor> {
    match window {
        Some(w) => shards.into_iter().skip(w.start).take(w.size).collect(),
        None => shards,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use facetharvest_shared::{FacetValue, default_facets};

    fn dim(name: &str, codes: &[&str]) -> FacetDimension {
        FacetDimension {
            name: name.into(),
            api_filter: name.into(),
            page_param: format!("f_{name}"),
            values: codes.iter().map(|c| FacetValue::new(*c, *c)).collect(),
        }
    }

    fn codes(shards: &[ShardDescriptor]) -> Vec<String> {
        shards.iter().map(|s| s.codes()).collect()
    }

    #[test]
    fn cross_product_order_is_nested() {
        let shards = generate_shards(&[dim("A", &["x", "y"]), dim("B", &["p", "q"])], None);
        assert_eq!(codes(&shards), vec!["x_p", "x_q", "y_p", "y_q"]);
        let ranks: Vec<_> = shards.iter().map(|s| s.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn shard_count_is_product_of_sizes() {
        let shards = generate_shards(
            &[dim("A", &["1", "2", "3"]), dim("B", &["a", "b"]), dim("C", &["u", "v", "w", "z"])],
            None,
        );
        assert_eq!(shards.len(), 24);
        let keys: HashSet<_> = shards.iter().map(|s| s.key.clone()).collect();
        assert_eq!(keys.len(), 24);
    }

    #[test]
    fn default_facets_give_126_shards() {
        let shards = generate_shards(&default_facets(), None);
        assert_eq!(shards.len(), 126);
        assert_eq!(shards[0].labels(), "intern+internship+remote");
    }

    #[test]
    fn generation_is_deterministic() {
        let dims = default_facets();
        let a = serde_json::to_vec(&generate_shards(&dims, None)).unwrap();
        let b = serde_json::to_vec(&generate_shards(&dims, None)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn history_reorders_by_descending_yield() {
        let dims = [dim("A", &["x", "y"]), dim("B", &["p", "q"])];
        let default = generate_shards(&dims, None);

        let mut history = BTreeMap::new();
        history.insert(default[2].key.clone(), 50); // y_p
        history.insert(default[1].key.clone(), 10); // x_q
        history.insert(default[3].key.clone(), 10); // y_q

        let shards = generate_shards(&dims, Some(&history));
        // x_q and y_q tie and keep default order; x_p is unseen and goes last.
        assert_eq!(codes(&shards), vec!["y_p", "x_q", "y_q", "x_p"]);
        let ranks: Vec<_> = shards.iter().map(|s| s.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        // Keys do not depend on rank.
        assert_eq!(shards[0].key, default[2].key);
    }

    #[test]
    fn empty_history_keeps_default_order() {
        let dims = [dim("A", &["x", "y"])];
        let shards = generate_shards(&dims, Some(&BTreeMap::new()));
        assert_eq!(codes(&shards), vec!["x", "y"]);
    }

    #[test]
    fn empty_dimension_yields_no_shards() {
        assert!(generate_shards(&[dim("A", &["x"]), dim("B", &[])], None).is_empty());
        assert!(generate_shards(&[], None).is_empty());
    }

    #[test]
    fn window_selects_slice() {
        let shards = generate_shards(&[dim("A", &["1", "2", "3", "4", "5"])], None);
        let window = BatchWindow::from_batch_number(2, 2).unwrap();
        let selected = select_window(shards, Some(window));
        assert_eq!(codes(&selected), vec!["3", "4"]);
        assert_eq!(selected[0].rank, 2);
    }
}
