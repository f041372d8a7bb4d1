// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests for the shadow index and the stored person form.
//!
//! Run with: `cargo test --test proptest_fuzz`

use chrono::NaiveDate;
use proptest::prelude::*;
use proptest::sample::Index;

use people_store::person::split_stack;
use people_store::{Person, ShadowIndex};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (1900i32..2020, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

/// Tags never contain the stored delimiter and are never empty
fn stack_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[A-Za-z0-9#+. ]{1,12}", 0..6)
}

fn ascii_person_strategy() -> impl Strategy<Value = Person> {
    ("[a-z0-9_]{1,16}", "[A-Za-z ]{1,30}", date_strategy(), stack_strategy())
        .prop_map(|(nickname, name, birthdate, stack)| Person::new(nickname, name, birthdate, stack))
}

fn any_person_strategy() -> impl Strategy<Value = Person> {
    (".{1,16}", ".{0,30}", date_strategy(), prop::collection::vec(".{0,12}", 0..6))
        .prop_map(|(nickname, name, birthdate, stack)| Person::new(nickname, name, birthdate, stack))
}

// =============================================================================
// Stored form
// =============================================================================

proptest! {
    #[test]
    fn stored_row_decodes_to_same_person(person in ascii_person_strategy()) {
        let row = person.to_row();
        prop_assert_eq!(row.to_person(), person);
    }

    #[test]
    fn split_stack_never_yields_a_lone_empty_tag(text in ".{0,40}") {
        let tags = split_stack(&text);
        prop_assert!(!(tags.len() == 1 && tags[0].is_empty()));
        if text.is_empty() {
            prop_assert!(tags.is_empty());
        }
    }

    #[test]
    fn arbitrary_text_never_panics(person in any_person_strategy()) {
        let row = person.to_row();
        let decoded = row.to_person();
        prop_assert_eq!(decoded.id, person.id);
        prop_assert_eq!(decoded.nickname, person.nickname);
    }

    #[test]
    fn stored_stack_survives_the_stored_form(person in any_person_strategy()) {
        let person = person.with_stored_stack();
        prop_assert_eq!(person.to_row().to_person(), person.clone());
        prop_assert_eq!(person.clone().with_stored_stack(), person);
    }

    #[test]
    fn search_blob_is_lowercase_and_starts_with_nickname(person in ascii_person_strategy()) {
        let blob = person.search_blob();
        prop_assert!(!blob.chars().any(|c| c.is_ascii_uppercase()));
        prop_assert!(blob.starts_with(&person.nickname));
    }
}

// =============================================================================
// Shadow index
// =============================================================================

proptest! {
    #[test]
    fn any_substring_of_the_blob_finds_the_person(
        person in ascii_person_strategy(),
        start in any::<Index>(),
        len in 1usize..10,
        upper in any::<bool>(),
    ) {
        let blob = person.search_blob();
        let chars: Vec<char> = blob.chars().collect();
        let from = start.index(chars.len());
        let to = (from + len).min(chars.len());
        let mut term: String = chars[from..to].iter().collect();
        if upper {
            term = term.to_uppercase();
        }

        let shadow = ShadowIndex::new(16);
        shadow.insert(person.clone());
        prop_assert_eq!(shadow.search(&term, 50), vec![person]);
    }

    #[test]
    fn shadow_keeps_newest_entries_within_capacity(
        people in prop::collection::vec(ascii_person_strategy(), 0..40),
        capacity in 1usize..20,
    ) {
        // Nicknames may repeat in generated data; ids never do
        let shadow = ShadowIndex::new(capacity);
        for p in &people {
            shadow.insert(p.clone());
        }

        let kept = people.len().min(capacity);
        prop_assert_eq!(shadow.len(), kept);

        let expected: Vec<Person> = people[people.len() - kept..].to_vec();
        prop_assert_eq!(shadow.search("", 100), expected);
    }

    #[test]
    fn search_never_exceeds_limit(
        people in prop::collection::vec(ascii_person_strategy(), 0..30),
        limit in 0usize..10,
    ) {
        let shadow = ShadowIndex::new(100);
        for p in &people {
            shadow.insert(p.clone());
        }
        prop_assert!(shadow.search("", limit).len() <= limit);
    }

    #[test]
    fn confirm_removes_exactly_the_confirmed(
        people in prop::collection::vec(ascii_person_strategy(), 1..30),
        split in any::<Index>(),
    ) {
        let shadow = ShadowIndex::new(100);
        for p in &people {
            shadow.insert(p.clone());
        }

        let at = split.index(people.len());
        let confirmed: Vec<_> = people[..at].iter().map(|p| p.id).collect();
        prop_assert_eq!(shadow.confirm(&confirmed), at);

        for p in &people[..at] {
            prop_assert!(shadow.get(p.id).is_none());
        }
        for p in &people[at..] {
            prop_assert_eq!(shadow.get(p.id), Some(p.clone()));
        }
    }
}
