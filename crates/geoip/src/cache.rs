use indexmap::IndexMap;

/// Bounded, insertion-ordered location cache (SPEC_FULL §4.4).
///
/// Eviction is oldest-inserted, not least-recently-used: a touch (cache hit) does not move an
/// entry. `IndexMap::shift_remove` on the front is what gives us that semantics cheaply — a
/// conventional LRU (touch-promotes) would need an additional structure this cache deliberately
/// doesn't carry.
pub struct LocationCache {
  entries: IndexMap<String, i64>,
  capacity: usize,
}

impl LocationCache {
  pub fn new(capacity: usize) -> Self {
    Self {
      entries: IndexMap::with_capacity(capacity),
      capacity,
    }
  }

  pub fn get(&self, geohash: &str) -> Option<i64> {
    self.entries.get(geohash).copied()
  }

  pub fn insert(&mut self, geohash: String, location_id: i64) {
    if !self.entries.contains_key(&geohash) && self.entries.len() >= self.capacity {
      self.entries.shift_remove_index(0);
    }
    self.entries.insert(geohash, location_id);
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
