//! Property-based test generators using proptest.

use crate::fixtures::Person;
use modeldb_core::Value;
use proptest::prelude::*;

/// Strategy for person names; deliberately small so names collide.
pub fn person_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-e]{1,3}").expect("Invalid regex")
}

/// Strategy for membership numbers with frequent collisions.
pub fn person_number_strategy() -> impl Strategy<Value = u64> {
    0u64..16
}

/// Strategy for a person.
pub fn person_strategy() -> impl Strategy<Value = Person> {
    (person_name_strategy(), person_number_strategy())
        .prop_map(|(name, number)| Person::new(name, number))
}

/// Strategy for a batch of people.
pub fn people_strategy(max: usize) -> impl Strategy<Value = Vec<Person>> {
    prop::collection::vec(person_strategy(), 0..max)
}

/// One edit applied to a stored person.
#[derive(Debug, Clone)]
pub enum PersonEdit {
    /// Rename through `update`.
    Rename(String),
    /// Renumber through `set_field`.
    Renumber(u64),
    /// Reset the number through `reset_field`.
    ResetNumber,
    /// Erase the person.
    Erase,
}

/// Strategy for a list of `(target, edit)` pairs; targets index into the
/// stored people modulo their count.
pub fn person_edits_strategy(max: usize) -> impl Strategy<Value = Vec<(usize, PersonEdit)>> {
    let edit = prop_oneof![
        4 => person_name_strategy().prop_map(PersonEdit::Rename),
        4 => person_number_strategy().prop_map(PersonEdit::Renumber),
        1 => Just(PersonEdit::ResetNumber),
        1 => Just(PersonEdit::Erase),
    ];
    prop::collection::vec((any::<usize>(), edit), 0..max)
}

/// Strategy for scalar values of every non-reference type.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<u64>().prop_map(Value::UInt),
        any::<f64>().prop_map(Value::Float),
        "[a-z]{0,8}".prop_map(Value::Text),
    ]
}
