// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Person record.
//!
//! The [`Person`] is the entity that flows through the store. Its nickname is
//! the natural key and must be unique across all people.
//!
//! # Example
//!
//! ```
//! use people_store::Person;
//! use chrono::NaiveDate;
//!
//! let person = Person::new(
//!     "ada",
//!     "Ada Lovelace",
//!     NaiveDate::from_ymd_opt(1815, 12, 10).unwrap(),
//!     vec!["Analytical Engine".into(), "Notes".into()],
//! );
//!
//! assert_eq!(person.stack_text(), "Analytical Engine,Notes");
//! assert!(person.search_blob().contains("analytical engine"));
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delimiter used for the stored form of the stack.
///
/// Tags are not escaped: a tag containing it reads back as several tags, and
/// a stack of one empty tag reads back as an empty stack. See
/// [`Person::with_stored_stack`].
pub const STACK_DELIMITER: char = ',';

/// A directory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Generated at creation, never changes
    pub id: Uuid,
    /// Natural key, unique across all people
    pub nickname: String,
    pub name: String,
    /// Calendar date, serialized as `YYYY-MM-DD`
    pub birthdate: NaiveDate,
    /// Ordered free-text tags (may be empty)
    #[serde(default)]
    pub stack: Vec<String>,
}

impl Person {
    /// Create a new person with a freshly generated id.
    pub fn new(
        nickname: impl Into<String>,
        name: impl Into<String>,
        birthdate: NaiveDate,
        stack: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            nickname: nickname.into(),
            name: name.into(),
            birthdate,
            stack,
        }
    }

    /// Rebuild a person from its stored columns.
    pub fn from_stored(
        id: Uuid,
        nickname: String,
        name: String,
        birthdate: NaiveDate,
        stack_text: &str,
    ) -> Self {
        Self {
            id,
            nickname,
            name,
            birthdate,
            stack: split_stack(stack_text),
        }
    }

    /// The same person with the stack exactly as it reads back from the store.
    ///
    /// Applied on creation so every read tier returns the same stack.
    #[must_use]
    pub fn with_stored_stack(mut self) -> Self {
        self.stack = split_stack(&self.stack_text());
        self
    }

    /// Stored form of the stack (comma-delimited).
    #[must_use]
    pub fn stack_text(&self) -> String {
        self.stack.join(&STACK_DELIMITER.to_string())
    }

    /// Lowercased nickname, name and stack, used for substring and trigram matching.
    #[must_use]
    pub fn search_blob(&self) -> String {
        let mut blob = String::with_capacity(
            self.nickname.len() + self.name.len() + self.stack.iter().map(|s| s.len() + 1).sum::<usize>() + 1,
        );
        blob.push_str(&self.nickname);
        blob.push(' ');
        blob.push_str(&self.name);
        for tag in &self.stack {
            blob.push(' ');
            blob.push_str(tag);
        }
        blob.to_lowercase()
    }

    /// Positional row prepared for bulk insertion.
    #[must_use]
    pub fn to_row(&self) -> PersonRow {
        PersonRow {
            id: self.id,
            nickname: self.nickname.clone(),
            name: self.name.clone(),
            birthdate: self.birthdate,
            stack: self.stack_text(),
            search: self.search_blob(),
        }
    }
}

/// Split a stored stack back into tags. An empty column is an empty stack.
#[must_use]
pub fn split_stack(stack_text: &str) -> Vec<String> {
    if stack_text.is_empty() {
        return Vec::new();
    }
    stack_text.split(STACK_DELIMITER).map(str::to_string).collect()
}

/// Column values for one `people` row, in insert order:
/// `id, nickname, name, birthdate, stack, search`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonRow {
    pub id: Uuid,
    pub nickname: String,
    pub name: String,
    pub birthdate: NaiveDate,
    pub stack: String,
    pub search: String,
}

impl PersonRow {
    /// Decode the row back into a person.
    #[must_use]
    pub fn to_person(&self) -> Person {
        Person::from_stored(
            self.id,
            self.nickname.clone(),
            self.name.clone(),
            self.birthdate,
            &self.stack,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_new_generates_unique_ids() {
        let a = Person::new("a", "A", date(2000, 1, 1), vec![]);
        let b = Person::new("b", "B", date(2000, 1, 1), vec![]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_search_blob_is_lowercase_and_ordered() {
        let person = Person::new(
            "JoseRoberto",
            "José Roberto",
            date(2000, 10, 1),
            vec!["C#".into(), "Node".into(), "Oracle".into()],
        );
        assert_eq!(person.search_blob(), "joseroberto josé roberto c# node oracle");
    }

    #[test]
    fn test_empty_stack_round_trip() {
        let person = Person::new("ana", "Ana", date(1985, 9, 23), vec![]);
        assert_eq!(person.stack_text(), "");

        let decoded = person.to_row().to_person();
        assert!(decoded.stack.is_empty());
        assert_eq!(decoded, person);
    }

    #[test]
    fn test_row_decodes_to_same_person() {
        let person = Person::new("ze", "José", date(1990, 2, 28), vec!["Rust".into(), "Go".into()]);
        let row = person.to_row();

        assert_eq!(row.stack, "Rust,Go");
        assert_eq!(row.to_person(), person);
    }

    #[test]
    fn test_with_stored_stack_matches_what_the_store_returns() {
        let person = Person::new("ze", "José", date(1990, 2, 28), vec!["C, C++".into(), "Go".into()]);
        let stored = person.clone().with_stored_stack();

        assert_eq!(stored.stack, vec!["C", " C++", "Go"]);
        assert_eq!(stored.to_row().to_person(), stored);

        let lone_empty = Person::new("x", "X", date(1990, 2, 28), vec![String::new()]).with_stored_stack();
        assert!(lone_empty.stack.is_empty());
    }

    #[test]
    fn test_birthdate_serializes_as_calendar_date() {
        let person = Person::new("ze", "José", date(1990, 2, 8), vec![]);
        let json = serde_json::to_value(&person).unwrap();
        assert_eq!(json["birthdate"], "1990-02-08");
    }

    #[test]
    fn test_missing_stack_deserializes_empty() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "nickname": "ze",
            "name": "José",
            "birthdate": "1990-02-08",
        });
        let person: Person = serde_json::from_value(json).unwrap();
        assert!(person.stack.is_empty());
    }
}
