//! Quota-checked views over an image's tag set and location list.
//!
//! A [`GuardedTags`] or [`GuardedLocations`] borrows the collection of the
//! layer beneath it and runs an optional growth check before every mutating
//! call. Only the innermost raw collection is ever written to, and every
//! layer checks before delegating inward, so a rejection at any layer leaves
//! the collection exactly as it was.
//!
//! Removal is never checked. Reads go straight to the underlying collection.

use std::collections::BTreeSet;
use std::fmt;
use stowage_common::{Location, Result};

/// Size of a collection before and after a proposed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Growth {
    pub before: usize,
    pub after: usize,
    /// The whole collection is being swapped out rather than added to.
    pub replacing: bool,
}

impl Growth {
    fn adding(before: usize, added: usize) -> Self {
        Self {
            before,
            after: before + added,
            replacing: false,
        }
    }

    fn replacing(before: usize, after: usize) -> Self {
        Self {
            before,
            after,
            replacing: true,
        }
    }

    /// Elements added on top of the existing ones.
    pub fn added(&self) -> usize {
        self.after.saturating_sub(self.before)
    }
}

/// Check run before a mutation is allowed through.
pub type GrowthCheck<'a> = Box<dyn Fn(&Growth) -> Result<()> + 'a>;

/// Mutable tag storage one layer down.
pub trait TagSet {
    fn tag_set(&self) -> &BTreeSet<String>;
    fn insert_tag(&mut self, tag: String) -> Result<bool>;
    fn extend_tags(&mut self, tags: BTreeSet<String>) -> Result<()>;
    fn replace_tags(&mut self, tags: BTreeSet<String>) -> Result<()>;
    fn remove_tag(&mut self, tag: &str) -> bool;
    fn clear_tags(&mut self);
}

impl TagSet for BTreeSet<String> {
    fn tag_set(&self) -> &BTreeSet<String> {
        self
    }

    fn insert_tag(&mut self, tag: String) -> Result<bool> {
        Ok(self.insert(tag))
    }

    fn extend_tags(&mut self, tags: BTreeSet<String>) -> Result<()> {
        self.extend(tags);
        Ok(())
    }

    fn replace_tags(&mut self, tags: BTreeSet<String>) -> Result<()> {
        *self = tags;
        Ok(())
    }

    fn remove_tag(&mut self, tag: &str) -> bool {
        self.remove(tag)
    }

    fn clear_tags(&mut self) {
        self.clear();
    }
}

impl<T: TagSet + ?Sized> TagSet for &mut T {
    fn tag_set(&self) -> &BTreeSet<String> {
        (**self).tag_set()
    }

    fn insert_tag(&mut self, tag: String) -> Result<bool> {
        (**self).insert_tag(tag)
    }

    fn extend_tags(&mut self, tags: BTreeSet<String>) -> Result<()> {
        (**self).extend_tags(tags)
    }

    fn replace_tags(&mut self, tags: BTreeSet<String>) -> Result<()> {
        (**self).replace_tags(tags)
    }

    fn remove_tag(&mut self, tag: &str) -> bool {
        (**self).remove_tag(tag)
    }

    fn clear_tags(&mut self) {
        (**self).clear_tags()
    }
}

/// An image's tag set behind an optional quota check.
pub struct GuardedTags<'a> {
    inner: Box<dyn TagSet + 'a>,
    check: Option<GrowthCheck<'a>>,
}

impl<'a> GuardedTags<'a> {
    /// Pass-through view of a raw set.
    pub fn unguarded(tags: &'a mut BTreeSet<String>) -> Self {
        Self {
            inner: Box::new(tags),
            check: None,
        }
    }

    /// Wrap a lower layer with a growth check.
    pub fn guarded<T, F>(inner: T, check: F) -> Self
    where
        T: TagSet + 'a,
        F: Fn(&Growth) -> Result<()> + 'a,
    {
        Self {
            inner: Box::new(inner),
            check: Some(Box::new(check)),
        }
    }

    fn run_check(&self, growth: Growth) -> Result<()> {
        match &self.check {
            Some(check) => check(&growth),
            None => Ok(()),
        }
    }

    /// Add one tag. Returns `false` if it was already present.
    pub fn add(&mut self, tag: impl Into<String>) -> Result<bool> {
        self.insert_tag(tag.into())
    }

    /// Add several tags at once, all or nothing.
    pub fn extend<I, S>(&mut self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extend_tags(tags.into_iter().map(Into::into).collect())
    }

    /// Swap the whole set.
    pub fn replace(&mut self, tags: BTreeSet<String>) -> Result<()> {
        self.replace_tags(tags)
    }

    pub fn remove(&mut self, tag: &str) -> bool {
        self.remove_tag(tag)
    }

    pub fn clear(&mut self) {
        self.clear_tags()
    }

    pub fn len(&self) -> usize {
        self.tag_set().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tag_set().is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tag_set().contains(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> + '_ {
        self.tag_set().iter()
    }
}

impl TagSet for GuardedTags<'_> {
    fn tag_set(&self) -> &BTreeSet<String> {
        self.inner.tag_set()
    }

    fn insert_tag(&mut self, tag: String) -> Result<bool> {
        if self.tag_set().contains(&tag) {
            return Ok(false);
        }
        self.run_check(Growth::adding(self.len(), 1))?;
        self.inner.insert_tag(tag)
    }

    fn extend_tags(&mut self, tags: BTreeSet<String>) -> Result<()> {
        let fresh: BTreeSet<String> = tags.difference(self.tag_set()).cloned().collect();
        if fresh.is_empty() {
            return Ok(());
        }
        self.run_check(Growth::adding(self.len(), fresh.len()))?;
        self.inner.extend_tags(fresh)
    }

    fn replace_tags(&mut self, tags: BTreeSet<String>) -> Result<()> {
        self.run_check(Growth::replacing(self.len(), tags.len()))?;
        self.inner.replace_tags(tags)
    }

    fn remove_tag(&mut self, tag: &str) -> bool {
        self.inner.remove_tag(tag)
    }

    fn clear_tags(&mut self) {
        self.inner.clear_tags()
    }
}

impl PartialEq<BTreeSet<String>> for GuardedTags<'_> {
    fn eq(&self, other: &BTreeSet<String>) -> bool {
        self.tag_set() == other
    }
}

impl fmt::Debug for GuardedTags<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.tag_set()).finish()
    }
}

/// Mutable location storage one layer down.
pub trait LocationList {
    fn location_slice(&self) -> &[Location];
    fn push_location(&mut self, location: Location) -> Result<()>;
    fn insert_location(&mut self, index: usize, location: Location) -> Result<()>;
    fn extend_locations(&mut self, locations: Vec<Location>) -> Result<()>;
    fn replace_locations(&mut self, locations: Vec<Location>) -> Result<()>;
    fn remove_location(&mut self, index: usize) -> Option<Location>;
    fn clear_locations(&mut self);
}

impl LocationList for Vec<Location> {
    fn location_slice(&self) -> &[Location] {
        self
    }

    fn push_location(&mut self, location: Location) -> Result<()> {
        self.push(location);
        Ok(())
    }

    fn insert_location(&mut self, index: usize, location: Location) -> Result<()> {
        // Past-the-end inserts append.
        let index = index.min(self.len());
        self.insert(index, location);
        Ok(())
    }

    fn extend_locations(&mut self, locations: Vec<Location>) -> Result<()> {
        self.extend(locations);
        Ok(())
    }

    fn replace_locations(&mut self, locations: Vec<Location>) -> Result<()> {
        *self = locations;
        Ok(())
    }

    fn remove_location(&mut self, index: usize) -> Option<Location> {
        (index < self.len()).then(|| self.remove(index))
    }

    fn clear_locations(&mut self) {
        self.clear();
    }
}

impl<T: LocationList + ?Sized> LocationList for &mut T {
    fn location_slice(&self) -> &[Location] {
        (**self).location_slice()
    }

    fn push_location(&mut self, location: Location) -> Result<()> {
        (**self).push_location(location)
    }

    fn insert_location(&mut self, index: usize, location: Location) -> Result<()> {
        (**self).insert_location(index, location)
    }

    fn extend_locations(&mut self, locations: Vec<Location>) -> Result<()> {
        (**self).extend_locations(locations)
    }

    fn replace_locations(&mut self, locations: Vec<Location>) -> Result<()> {
        (**self).replace_locations(locations)
    }

    fn remove_location(&mut self, index: usize) -> Option<Location> {
        (**self).remove_location(index)
    }

    fn clear_locations(&mut self) {
        (**self).clear_locations()
    }
}

/// An image's ordered location list behind an optional quota check.
///
/// Duplicates are permitted.
pub struct GuardedLocations<'a> {
    inner: Box<dyn LocationList + 'a>,
    check: Option<GrowthCheck<'a>>,
}

impl<'a> GuardedLocations<'a> {
    /// Pass-through view of a raw list.
    pub fn unguarded(locations: &'a mut Vec<Location>) -> Self {
        Self {
            inner: Box::new(locations),
            check: None,
        }
    }

    /// Wrap a lower layer with a growth check.
    pub fn guarded<L, F>(inner: L, check: F) -> Self
    where
        L: LocationList + 'a,
        F: Fn(&Growth) -> Result<()> + 'a,
    {
        Self {
            inner: Box::new(inner),
            check: Some(Box::new(check)),
        }
    }

    fn run_check(&self, growth: Growth) -> Result<()> {
        match &self.check {
            Some(check) => check(&growth),
            None => Ok(()),
        }
    }

    pub fn append(&mut self, location: Location) -> Result<()> {
        self.push_location(location)
    }

    pub fn insert(&mut self, index: usize, location: Location) -> Result<()> {
        self.insert_location(index, location)
    }

    /// Append several locations, all or nothing.
    pub fn extend(&mut self, locations: impl IntoIterator<Item = Location>) -> Result<()> {
        self.extend_locations(locations.into_iter().collect())
    }

    /// Swap the whole list.
    pub fn replace(&mut self, locations: Vec<Location>) -> Result<()> {
        self.replace_locations(locations)
    }

    pub fn remove(&mut self, index: usize) -> Option<Location> {
        self.remove_location(index)
    }

    pub fn pop(&mut self) -> Option<Location> {
        match self.len() {
            0 => None,
            n => self.remove_location(n - 1),
        }
    }

    pub fn clear(&mut self) {
        self.clear_locations()
    }

    pub fn len(&self) -> usize {
        self.location_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.location_slice().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Location> {
        self.location_slice().get(index)
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.location_slice().contains(location)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Location> {
        self.location_slice().iter()
    }
}

impl LocationList for GuardedLocations<'_> {
    fn location_slice(&self) -> &[Location] {
        self.inner.location_slice()
    }

    fn push_location(&mut self, location: Location) -> Result<()> {
        self.run_check(Growth::adding(self.len(), 1))?;
        self.inner.push_location(location)
    }

    fn insert_location(&mut self, index: usize, location: Location) -> Result<()> {
        self.run_check(Growth::adding(self.len(), 1))?;
        self.inner.insert_location(index, location)
    }

    fn extend_locations(&mut self, locations: Vec<Location>) -> Result<()> {
        if locations.is_empty() {
            return Ok(());
        }
        self.run_check(Growth::adding(self.len(), locations.len()))?;
        self.inner.extend_locations(locations)
    }

    fn replace_locations(&mut self, locations: Vec<Location>) -> Result<()> {
        self.run_check(Growth::replacing(self.len(), locations.len()))?;
        self.inner.replace_locations(locations)
    }

    fn remove_location(&mut self, index: usize) -> Option<Location> {
        self.inner.remove_location(index)
    }

    fn clear_locations(&mut self) {
        self.inner.clear_locations()
    }
}

impl PartialEq<[Location]> for GuardedLocations<'_> {
    fn eq(&self, other: &[Location]) -> bool {
        self.location_slice() == other
    }
}

impl PartialEq<Vec<Location>> for GuardedLocations<'_> {
    fn eq(&self, other: &Vec<Location>) -> bool {
        self.location_slice() == other.as_slice()
    }
}

impl fmt::Debug for GuardedLocations<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.location_slice()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use stowage_common::Error;

    fn at_most(limit: usize) -> impl Fn(&Growth) -> Result<()> {
        move |growth: &Growth| {
            if growth.after > limit {
                Err(Error::TagLimitExceeded {
                    attempted: growth.after as u64,
                    maximum: limit as u64,
                })
            } else {
                Ok(())
            }
        }
    }

    fn set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_tags_reads_are_pass_through() {
        let mut raw = set(&["a", "b", "c", "d"]);
        let guard = GuardedTags::guarded(GuardedTags::unguarded(&mut raw), at_most(0));

        assert_eq!(guard.len(), 4);
        assert!(guard.contains("a"));
        assert_eq!(guard.iter().count(), 4);
        assert_eq!(guard, set(&["a", "b", "c", "d"]));
    }

    #[test]
    fn test_tag_add_rejected_leaves_set_unchanged() {
        let mut raw = set(&["first"]);
        {
            let mut guard = GuardedTags::guarded(GuardedTags::unguarded(&mut raw), at_most(1));
            let err = guard.add("second").unwrap_err();
            assert!(err.to_string().contains("Attempted: 2, Maximum: 1"));
            assert_eq!(guard, set(&["first"]));
        }
        assert_eq!(raw, set(&["first"]));
    }

    #[test]
    fn test_tag_add_existing_is_not_growth() {
        let mut raw = set(&["first"]);
        let mut guard = GuardedTags::guarded(GuardedTags::unguarded(&mut raw), at_most(0));
        assert!(!guard.add("first").unwrap());
    }

    #[test]
    fn test_tag_extend_counts_only_new_tags() {
        let mut raw = set(&["a"]);
        let mut guard = GuardedTags::guarded(GuardedTags::unguarded(&mut raw), at_most(2));

        guard.extend(["a", "b"]).unwrap();
        assert_eq!(guard.len(), 2);

        assert!(guard.extend(["c", "d"]).is_err());
        assert_eq!(guard, set(&["a", "b"]));
    }

    #[test]
    fn test_tag_replace_checks_new_size() {
        let mut raw = BTreeSet::new();
        let mut guard = GuardedTags::guarded(GuardedTags::unguarded(&mut raw), at_most(0));

        let err = guard.replace(set(&["x", "y"])).unwrap_err();
        assert!(err.to_string().contains("Attempted: 2, Maximum: 0"));
        assert!(guard.is_empty());
    }

    #[test]
    fn test_tag_removal_never_checked() {
        let mut raw = set(&["a", "b"]);
        let mut guard = GuardedTags::guarded(GuardedTags::unguarded(&mut raw), at_most(0));

        assert!(guard.remove("a"));
        assert!(!guard.remove("missing"));
        guard.clear();
        assert!(guard.is_empty());
    }

    #[test]
    fn test_stacked_guards_reject_at_inner_layer() {
        let outer_calls = Cell::new(0);
        let mut raw = set(&["a"]);
        {
            let inner = GuardedTags::guarded(GuardedTags::unguarded(&mut raw), at_most(1));
            let mut outer = GuardedTags::guarded(inner, |_: &Growth| {
                outer_calls.set(outer_calls.get() + 1);
                Ok(())
            });
            assert!(outer.add("b").is_err());
        }
        assert_eq!(outer_calls.get(), 1);
        assert_eq!(raw, set(&["a"]));
    }

    fn loc(url: &str) -> Location {
        Location::new(url)
    }

    fn growth_log<'a>(
        log: &'a std::cell::RefCell<Vec<Growth>>,
        limit: usize,
    ) -> impl Fn(&Growth) -> Result<()> + 'a {
        move |growth: &Growth| {
            log.borrow_mut().push(*growth);
            if growth.after > limit {
                Err(Error::StorageQuotaFull {
                    attempted: Some(growth.added() as u64),
                    consumed: growth.before as u64,
                    limit: limit as u64,
                })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_location_mutations_in_order() {
        let mut raw = vec![loc("a")];
        let mut guard = GuardedLocations::unguarded(&mut raw);

        guard.append(loc("c")).unwrap();
        guard.insert(1, loc("b")).unwrap();
        guard.insert(99, loc("d")).unwrap();
        guard.extend([loc("e"), loc("e")]).unwrap();

        assert_eq!(
            guard,
            vec![loc("a"), loc("b"), loc("c"), loc("d"), loc("e"), loc("e")]
        );
        assert_eq!(guard.remove(1), Some(loc("b")));
        assert_eq!(guard.remove(42), None);
        assert_eq!(guard.pop(), Some(loc("e")));
        assert_eq!(guard.get(0), Some(&loc("a")));
        assert!(guard.contains(&loc("d")));
    }

    #[test]
    fn test_location_growth_reported() {
        let log = std::cell::RefCell::new(Vec::new());
        let mut raw = vec![loc("a")];
        let mut guard =
            GuardedLocations::guarded(GuardedLocations::unguarded(&mut raw), growth_log(&log, 3));

        guard.append(loc("b")).unwrap();
        guard.extend(vec![loc("c")]).unwrap();
        guard.replace(vec![loc("z")]).unwrap();

        let log = log.borrow();
        assert_eq!(
            log[0],
            Growth {
                before: 1,
                after: 2,
                replacing: false
            }
        );
        assert_eq!(log[1].added(), 1);
        assert_eq!(
            log[2],
            Growth {
                before: 3,
                after: 1,
                replacing: true
            }
        );
    }

    #[test]
    fn test_location_rejections_leave_list_unchanged() {
        let log = std::cell::RefCell::new(Vec::new());
        let mut raw = vec![loc("a"), loc("b")];
        {
            let mut guard = GuardedLocations::guarded(
                GuardedLocations::unguarded(&mut raw),
                growth_log(&log, 2),
            );
            let before: Vec<Location> = guard.iter().cloned().collect();

            assert!(guard.append(loc("c")).is_err());
            assert!(guard.insert(0, loc("c")).is_err());
            assert!(guard.extend([loc("c")]).is_err());
            assert!(guard.replace(vec![loc("x"), loc("y"), loc("z")]).is_err());

            assert_eq!(guard, before);
        }
        assert_eq!(raw, vec![loc("a"), loc("b")]);
    }

    #[test]
    fn test_empty_extend_skips_check() {
        let log = std::cell::RefCell::new(Vec::new());
        let mut raw = vec![loc("a")];
        let mut guard =
            GuardedLocations::guarded(GuardedLocations::unguarded(&mut raw), growth_log(&log, 0));

        guard.extend(Vec::new()).unwrap();
        assert!(log.borrow().is_empty());
    }
}
