//! Edit scripts between two product lists for incremental view updates.
//!
//! Items are matched by key (product id); matched items whose content
//! differs get an `Update`. The script is correct for any pair of lists,
//! including duplicate keys, but not necessarily minimal.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use crate::catalog::types::Product;

/// Something with a stable identity across list refreshes.
pub trait Keyed: Clone {
  type Key: Eq + Hash;

  fn key(&self) -> Self::Key;

  /// Whether two items with the same key render identically.
  fn same_content(&self, other: &Self) -> bool;
}

impl Keyed for Product {
  type Key = i64;

  fn key(&self) -> i64 {
    self.id
  }

  fn same_content(&self, other: &Self) -> bool {
    self == other
  }
}

/// One step of an edit script. Indices refer to the list as it is when
/// the step is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit<T> {
  Remove { index: usize },
  Insert { index: usize, item: T },
  Move { from: usize, to: usize },
  Update { index: usize, item: T },
}

/// Compute an edit script turning `old` into `new`.
pub fn diff<T: Keyed>(old: &[T], new: &[T]) -> Vec<Edit<T>> {
  // Pair the k-th occurrence of a key in `old` with its k-th occurrence in `new`
  let mut new_positions: HashMap<T::Key, VecDeque<usize>> = HashMap::new();
  for (j, item) in new.iter().enumerate() {
    new_positions.entry(item.key()).or_default().push_back(j);
  }

  let mut source_of_new: Vec<Option<usize>> = vec![None; new.len()];
  let mut kept = vec![false; old.len()];
  for (i, item) in old.iter().enumerate() {
    if let Some(j) = new_positions.get_mut(&item.key()).and_then(VecDeque::pop_front) {
      source_of_new[j] = Some(i);
      kept[i] = true;
    }
  }

  let mut script = Vec::new();

  // Removals back to front so earlier indices stay valid
  for i in (0..old.len()).rev() {
    if !kept[i] {
      script.push(Edit::Remove { index: i });
    }
  }

  // Working copy: `Some(old index)` for surviving items, `None` for inserted ones
  let mut current: Vec<Option<usize>> = (0..old.len()).filter(|&i| kept[i]).map(Some).collect();

  for (j, source) in source_of_new.iter().enumerate() {
    match *source {
      None => {
        script.push(Edit::Insert {
          index: j,
          item: new[j].clone(),
        });
        current.insert(j, None);
      }
      Some(i) => {
        // Everything before `j` is already final, so the item is at or after it
        let from = current[j..]
          .iter()
          .position(|slot| *slot == Some(i))
          .map(|offset| offset + j)
          .unwrap_or(j);
        if from != j {
          script.push(Edit::Move { from, to: j });
          let slot = current.remove(from);
          current.insert(j, slot);
        }
      }
    }
  }

  for (j, source) in source_of_new.iter().enumerate() {
    if let Some(i) = *source {
      if !old[i].same_content(&new[j]) {
        script.push(Edit::Update {
          index: j,
          item: new[j].clone(),
        });
      }
    }
  }

  script
}

/// Apply an edit script in place.
#[cfg(test)]
pub fn apply<T: Clone>(list: &mut Vec<T>, script: &[Edit<T>]) {
  for edit in script {
    match edit {
      Edit::Remove { index } => {
        list.remove(*index);
      }
      Edit::Insert { index, item } => list.insert(*index, item.clone()),
      Edit::Move { from, to } => {
        let item = list.remove(*from);
        list.insert(*to, item);
      }
      Edit::Update { index, item } => list[*index] = item.clone(),
    }
  }
}

/// Counts of each edit kind, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
  pub inserted: usize,
  pub removed: usize,
  pub moved: usize,
  pub updated: usize,
}

impl DiffSummary {
  pub fn of<T>(script: &[Edit<T>]) -> Self {
    script.iter().fold(Self::default(), |mut acc, edit| {
      match edit {
        Edit::Remove { .. } => acc.removed += 1,
        Edit::Insert { .. } => acc.inserted += 1,
        Edit::Move { .. } => acc.moved += 1,
        Edit::Update { .. } => acc.updated += 1,
      }
      acc
    })
  }

  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[derive(Debug, Clone, PartialEq)]
  struct Row {
    id: u8,
    label: u8,
  }

  impl Keyed for Row {
    type Key = u8;

    fn key(&self) -> u8 {
      self.id
    }

    fn same_content(&self, other: &Self) -> bool {
      self == other
    }
  }

  fn rows(ids: &[u8]) -> Vec<Row> {
    ids.iter().map(|&id| Row { id, label: 0 }).collect()
  }

  fn product(id: i64, price: f64) -> Product {
    Product {
      id,
      title: format!("Product {}", id),
      brand: None,
      model: None,
      description: None,
      image: None,
      price: Some(price),
      shop_count: 1,
      cheapest_shop: Some("Shop".to_string()),
      url: None,
    }
  }

  fn round_trip<T: Keyed + PartialEq + std::fmt::Debug>(old: &[T], new: &[T]) -> Vec<Edit<T>> {
    let script = diff(old, new);
    let mut patched = old.to_vec();
    apply(&mut patched, &script);
    assert_eq!(patched, new);
    script
  }

  #[test]
  fn test_identical_lists_produce_empty_script() {
    let list = vec![product(1, 10.0), product(2, 20.0), product(3, 30.0)];
    assert!(diff(&list, &list).is_empty());
    assert!(diff::<Product>(&[], &[]).is_empty());
  }

  #[test]
  fn test_append_is_inserts_only() {
    let old = vec![product(1, 10.0), product(2, 20.0)];
    let mut new = old.clone();
    new.push(product(3, 30.0));

    let script = round_trip(&old, &new);
    assert_eq!(
      DiffSummary::of(&script),
      DiffSummary {
        inserted: 1,
        ..Default::default()
      }
    );
  }

  #[test]
  fn test_price_change_is_an_update() {
    let old = vec![product(1, 10.0), product(2, 20.0)];
    let new = vec![product(1, 10.0), product(2, 15.0)];

    let script = round_trip(&old, &new);
    assert_eq!(
      script,
      vec![Edit::Update {
        index: 1,
        item: product(2, 15.0)
      }]
    );
  }

  #[test]
  fn test_disjoint_lists() {
    let script = round_trip(&rows(&[1, 2, 3]), &rows(&[4, 5]));
    let summary = DiffSummary::of(&script);
    assert_eq!(summary.removed, 3);
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.moved, 0);
  }

  #[test]
  fn test_reorder_only_uses_moves() {
    let script = round_trip(&rows(&[1, 2, 3, 4]), &rows(&[4, 3, 2, 1]));
    let summary = DiffSummary::of(&script);
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.removed, 0);
    assert!(summary.moved > 0);
  }

  #[test]
  fn test_partial_overlap() {
    round_trip(&rows(&[1, 2, 3, 4, 5]), &rows(&[6, 4, 2, 7, 1]));
  }

  #[test]
  fn test_duplicate_keys() {
    round_trip(&rows(&[1, 1, 2]), &rows(&[2, 1, 3, 1, 1]));
  }

  proptest! {
    #[test]
    fn prop_script_transforms_old_into_new(
      old in prop::collection::vec((0u8..12, 0u8..3), 0..16),
      new in prop::collection::vec((0u8..12, 0u8..3), 0..16),
    ) {
      let old: Vec<Row> = old.into_iter().map(|(id, label)| Row { id, label }).collect();
      let new: Vec<Row> = new.into_iter().map(|(id, label)| Row { id, label }).collect();

      let script = diff(&old, &new);
      let mut patched = old.clone();
      apply(&mut patched, &script);
      prop_assert_eq!(patched, new);
    }

    #[test]
    fn prop_same_list_is_empty_script(
      ids in prop::collection::vec(0u8..50, 0..20),
    ) {
      let list = rows(&ids);
      prop_assert!(diff(&list, &list).is_empty());
    }
  }
}
