//! Operating initials allocation.
//!
//! Tiers, each tried only when the previous one yields a code already in use:
//!
//! 1. first letter of first name + first letter of last name
//! 2. the same two letters swapped
//! 3. [`ATTEMPTS_PER_TIER`] random pairs drawn from the letters of
//!    last name + first name
//! 4. [`ATTEMPTS_PER_TIER`] random pairs drawn from `A..=Z`
//!
//! If tier 4 runs out of attempts the allocation fails and the caller skips
//! the controller. [`allocate`] never mutates the working set; the caller
//! inserts each returned code before the next call.

use std::collections::HashSet;

use rand::Rng;

use roster_core::types::{LocalRecord, OperatingInitials};

/// Random draws per randomised tier.
///
/// The budget of one check plus up to ten retries, spent here as eleven
/// independent draws since every candidate in these tiers is random.
pub const ATTEMPTS_PER_TIER: usize = 11;

const ALPHABET: [char; 26] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

// ---------------------------------------------------------------------------
// Working set
// ---------------------------------------------------------------------------

/// Initials considered in use during one reconciliation pass.
///
/// Built from the active local records at pass start and extended in
/// allocation order; dropped when the pass ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    codes: HashSet<OperatingInitials>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initials held by active records. Soft-deleted rows contribute nothing.
    pub fn from_records(records: &[LocalRecord]) -> Self {
        records
            .iter()
            .filter(|r| r.is_active())
            .filter_map(|r| r.oi.clone())
            .collect()
    }

    pub fn contains(&self, code: &OperatingInitials) -> bool {
        self.codes.contains(code)
    }

    /// Returns `false` if the code was already present.
    pub fn insert(&mut self, code: OperatingInitials) -> bool {
        self.codes.insert(code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl FromIterator<OperatingInitials> for WorkingSet {
    fn from_iter<I: IntoIterator<Item = OperatingInitials>>(iter: I) -> Self {
        Self {
            codes: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

/// Derive unused initials for `first`/`last`, or `None` when every tier is
/// exhausted.
pub fn allocate<R>(
    first: &str,
    last: &str,
    used: &WorkingSet,
    rng: &mut R,
) -> Option<OperatingInitials>
where
    R: Rng,
{
    let first_letters = letters(first);
    let last_letters = letters(last);

    if let (Some(&f), Some(&l)) = (first_letters.first(), last_letters.first()) {
        for (a, b) in [(f, l), (l, f)] {
            match OperatingInitials::from_pair(a, b) {
                Some(code) if !used.contains(&code) => return Some(code),
                _ => {}
            }
        }
    }

    let mut pool = last_letters;
    pool.extend(first_letters);
    if let Some(code) = draw(&pool, used, rng) {
        return Some(code);
    }

    draw(&ALPHABET, used, rng)
}

fn draw<R>(pool: &[char], used: &WorkingSet, rng: &mut R) -> Option<OperatingInitials>
where
    R: Rng,
{
    if pool.is_empty() {
        return None;
    }
    for _ in 0..ATTEMPTS_PER_TIER {
        let a = pool[rng.gen_range(0..pool.len())];
        let b = pool[rng.gen_range(0..pool.len())];
        if let Some(code) = OperatingInitials::from_pair(a, b) {
            if !used.contains(&code) {
                return Some(code);
            }
        }
    }
    None
}

/// Uppercased alphabetic characters of `name`, in order.
fn letters(name: &str) -> Vec<char> {
    name.chars()
        .flat_map(char::to_uppercase)
        .filter(|c| c.is_alphabetic())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use roster_core::types::Cid;
    use rstest::rstest;

    fn oi(code: &str) -> OperatingInitials {
        OperatingInitials::new(code).expect("valid initials")
    }

    fn used(codes: &[&str]) -> WorkingSet {
        codes.iter().map(|c| oi(c)).collect()
    }

    fn every_pair() -> WorkingSet {
        let mut set = WorkingSet::new();
        for a in ALPHABET {
            for b in ALPHABET {
                set.insert(OperatingInitials::from_pair(a, b).expect("pair"));
            }
        }
        set
    }

    #[rstest]
    #[case::first_then_last("Ryan", "Ace", &[], "RA")]
    #[case::swapped_when_taken("Ryan", "Ace", &["RA"], "AR")]
    #[case::lowercase("ryan", "ace", &[], "RA")]
    #[case::punctuation_ignored("'Jo-Ann", "O'Brien", &[], "JO")]
    fn deterministic_tiers(
        #[case] first: &str,
        #[case] last: &str,
        #[case] taken: &[&str],
        #[case] expected: &str,
    ) {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(allocate(first, last, &used(taken), &mut rng), Some(oi(expected)));
    }

    #[test]
    fn third_tier_draws_from_name_letters() {
        let mut rng = StdRng::seed_from_u64(7);
        let code = allocate("Ryan", "Ace", &used(&["RA", "AR"]), &mut rng).expect("code");
        assert!(code.as_str().chars().all(|c| "ACERYN".contains(c)), "got {code}");
        assert_ne!(code, oi("RA"));
        assert_ne!(code, oi("AR"));
    }

    #[test]
    fn fourth_tier_falls_back_to_alphabet() {
        let mut rng = StdRng::seed_from_u64(3);
        let taken = used(&["AA", "AL", "LA", "LL"]);
        let code = allocate("Al", "La", &taken, &mut rng).expect("code");
        assert!(!taken.contains(&code));
    }

    #[test]
    fn name_without_letters_goes_straight_to_alphabet() {
        let mut rng = StdRng::seed_from_u64(5);
        let code = allocate("123", "--", &WorkingSet::new(), &mut rng).expect("code");
        assert!(code.as_str().chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn exhausted_alphabet_reports_failure() {
        let mut rng = StdRng::seed_from_u64(9);
        assert_eq!(allocate("Ryan", "Ace", &every_pair(), &mut rng), None);
    }

    #[test]
    fn allocate_does_not_touch_working_set() {
        let mut rng = StdRng::seed_from_u64(1);
        let set = used(&["RA"]);
        let _ = allocate("Ryan", "Ace", &set, &mut rng);
        assert_eq!(set, used(&["RA"]));
    }

    #[test]
    fn working_set_skips_deleted_records() {
        let now = chrono::Utc::now();
        let active = LocalRecord {
            cid: Cid(1),
            first_name: "Ryan".into(),
            last_name: "Ace".into(),
            email: None,
            rating: 3,
            oi: Some(oi("RA")),
            broadcast: false,
            visiting: false,
            member: true,
            roles: vec![],
            deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        let retired = LocalRecord {
            cid: Cid(2),
            oi: None,
            deleted: true,
            deleted_at: Some(now),
            ..active.clone()
        };
        let set = WorkingSet::from_records(&[active, retired]);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&oi("RA")));
    }
}
