//! Batch partitioning and order-preserving reassembly.
//!
//! Unit indices here are 1-based, matching what the generation service is asked for.

use crate::error::{PipelineError, Result};
use crate::models::GeneratedUnit;

/// Result of one batch call: `units[i]` belongs to `unit_indices[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitBatch {
    pub unit_indices: Vec<usize>,
    pub units: Vec<GeneratedUnit>,
}

/// Split `1..=unit_count` into consecutive batches of `batch_size`; the last may be shorter.
pub fn create_unit_batches(unit_count: usize, batch_size: usize) -> Vec<Vec<usize>> {
    let size = batch_size.max(1);
    (1..=unit_count)
        .collect::<Vec<_>>()
        .chunks(size)
        .map(<[usize]>::to_vec)
        .collect()
}

/// Place every returned unit at its slot, leaving slots of missing units empty.
pub fn place_units(unit_count: usize, batches: Vec<UnitBatch>) -> Result<Vec<Option<GeneratedUnit>>> {
    let mut slots: Vec<Option<GeneratedUnit>> = vec![None; unit_count];
    for batch in batches {
        if batch.unit_indices.len() != batch.units.len() {
            return Err(PipelineError::validation(format!(
                "batch lists {} indices but carries {} units",
                batch.unit_indices.len(),
                batch.units.len()
            )));
        }
        for (index, unit) in batch.unit_indices.into_iter().zip(batch.units) {
            if index == 0 || index > unit_count {
                return Err(PipelineError::validation(format!(
                    "unit index {index} outside 1..={unit_count}"
                )));
            }
            slots[index - 1] = Some(unit);
        }
    }
    Ok(slots)
}

/// Strict reassembly: every index in `1..=unit_count` must be present.
pub fn merge_units_from_batches(unit_count: usize, batches: Vec<UnitBatch>) -> Result<Vec<GeneratedUnit>> {
    let slots = place_units(unit_count, batches)?;
    let missing: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_none())
        .map(|(i, _)| i + 1)
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::MissingUnits(missing));
    }
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit(i: usize) -> GeneratedUnit {
        GeneratedUnit {
            title: format!("Unit title {i}"),
            games: Vec::new(),
        }
    }

    fn batches_for(n: usize, size: usize) -> Vec<UnitBatch> {
        create_unit_batches(n, size)
            .into_iter()
            .map(|idx| UnitBatch {
                units: idx.iter().map(|&i| unit(i)).collect(),
                unit_indices: idx,
            })
            .collect()
    }

    #[test]
    fn seven_by_three() {
        assert_eq!(create_unit_batches(7, 3), vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
        assert!(create_unit_batches(0, 3).is_empty());
        assert_eq!(create_unit_batches(2, 0), vec![vec![1], vec![2]]);
    }

    #[test]
    fn missing_slot_is_fatal() {
        let mut batches = batches_for(5, 2);
        batches.remove(1);
        let err = merge_units_from_batches(5, batches).unwrap_err();
        assert!(matches!(err, PipelineError::MissingUnits(ref m) if m == &vec![3, 4]));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let batches = vec![UnitBatch { unit_indices: vec![3], units: vec![unit(3)] }];
        assert!(matches!(
            merge_units_from_batches(2, batches),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn place_units_leaves_failed_batches_empty() {
        let mut batches = batches_for(4, 2);
        batches.remove(0);
        let slots = place_units(4, batches).unwrap();
        assert!(slots[0].is_none() && slots[1].is_none());
        assert_eq!(slots[3].as_ref().unwrap().title, "Unit title 4");
    }

    proptest! {
        #[test]
        fn batches_partition_the_range(n in 0usize..60, size in 1usize..10) {
            let batches = create_unit_batches(n, size);
            let flat: Vec<usize> = batches.iter().flatten().copied().collect();
            prop_assert_eq!(flat, (1..=n).collect::<Vec<_>>());
            prop_assert_eq!(batches.len(), n.div_ceil(size));
            if let Some((last, rest)) = batches.split_last() {
                prop_assert!(rest.iter().all(|b| b.len() == size));
                prop_assert!(!last.is_empty() && last.len() <= size);
            }
        }

        #[test]
        fn arrival_order_does_not_change_result(
            n in 1usize..30,
            size in 1usize..6,
            seed in any::<u64>(),
        ) {
            let ordered = merge_units_from_batches(n, batches_for(n, size)).unwrap();
            let mut shuffled = batches_for(n, size);
            // deterministic permutation driven by the seed
            let len = shuffled.len();
            for i in (1..len).rev() {
                let j = (seed.rotate_left(i as u32) as usize) % (i + 1);
                shuffled.swap(i, j);
            }
            let merged = merge_units_from_batches(n, shuffled).unwrap();
            let titles: Vec<_> = merged.iter().map(|u| u.title.clone()).collect();
            let expected: Vec<_> = ordered.iter().map(|u| u.title.clone()).collect();
            prop_assert_eq!(titles, expected);
        }
    }
}
