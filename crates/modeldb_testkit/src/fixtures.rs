//! Test fixtures and database helpers.
//!
//! Provides a small domain (people, groups and organizations) with its
//! descriptors, and a [`Fixture`] wiring the stores together the way an
//! application would.

use modeldb_core::{
    Config, Database, ErasePolicy, FieldDescriptor, FieldId, FieldPolicy, Handle, Model,
    ModelDescriptor, ModelId, ModelStore, RelationStore, Value, ValueType,
};
use std::sync::Arc;
use tempfile::TempDir;

/// A person, stored in the `people` store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Person {
    /// Display name.
    pub name: String,
    /// Membership number.
    pub number: u64,
}

impl Person {
    /// Field id of `name`.
    pub const NAME: FieldId = FieldId::new(1);
    /// Field id of `number`.
    pub const NUMBER: FieldId = FieldId::new(2);

    /// Creates a person.
    pub fn new(name: impl Into<String>, number: u64) -> Self {
        Self {
            name: name.into(),
            number,
        }
    }
}

impl Model for Person {
    fn model_name(&self) -> &str {
        "person"
    }
}

/// What kind of group a [`Group`] is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GroupKind {
    /// A plain group.
    #[default]
    Plain,
    /// An organization, which adds two officer fields to a group.
    Organization {
        /// The secretary, reset to `None` when that person is erased.
        secretary: Option<ModelId>,
        /// The accountant, reset to `None` when that person is erased.
        accountant: Option<ModelId>,
    },
}

/// A group founded by a person, stored in the `groups` store.
///
/// Plain groups and organizations share one store; the model name follows
/// [`GroupKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    /// Display name.
    pub name: String,
    /// The founder. Erasing the founder erases the group.
    pub founder: Option<ModelId>,
    /// Plain group or organization.
    pub kind: GroupKind,
}

impl Group {
    /// Field id of `name`.
    pub const NAME: FieldId = FieldId::new(1);
    /// Field id of `founder`.
    pub const FOUNDER: FieldId = FieldId::new(2);
    /// Field id of an organization's secretary.
    pub const SECRETARY: FieldId = FieldId::new(10);
    /// Field id of an organization's accountant.
    pub const ACCOUNTANT: FieldId = FieldId::new(11);

    /// Creates a plain group.
    pub fn new(name: impl Into<String>, founder: Option<ModelId>) -> Self {
        Self {
            name: name.into(),
            founder,
            kind: GroupKind::Plain,
        }
    }

    /// Creates an organization.
    pub fn organization(
        name: impl Into<String>,
        founder: Option<ModelId>,
        secretary: Option<ModelId>,
    ) -> Self {
        Self {
            name: name.into(),
            founder,
            kind: GroupKind::Organization {
                secretary,
                accountant: None,
            },
        }
    }

    /// Returns the secretary of an organization.
    pub fn secretary(&self) -> Option<ModelId> {
        match self.kind {
            GroupKind::Organization { secretary, .. } => secretary,
            GroupKind::Plain => None,
        }
    }

    /// Returns the accountant of an organization.
    pub fn accountant(&self) -> Option<ModelId> {
        match self.kind {
            GroupKind::Organization { accountant, .. } => accountant,
            GroupKind::Plain => None,
        }
    }

    fn set_secretary(&mut self, person: Option<ModelId>) {
        if let GroupKind::Organization { secretary, .. } = &mut self.kind {
            *secretary = person;
        }
    }

    fn set_accountant(&mut self, person: Option<ModelId>) {
        if let GroupKind::Organization { accountant, .. } = &mut self.kind {
            *accountant = person;
        }
    }
}

impl Model for Group {
    fn model_name(&self) -> &str {
        match self.kind {
            GroupKind::Plain => "group",
            GroupKind::Organization { .. } => "organization",
        }
    }
}

/// Builds the `person` descriptor.
pub fn person_descriptor(automatic_cleanup: bool) -> ModelDescriptor<Person> {
    ModelDescriptor::new("person", Person::default)
        .with_field(FieldDescriptor::new(
            Person::NAME,
            "name",
            ValueType::Text,
            |person: &Person| Value::from(person.name.as_str()),
            |person: &mut Person, value: Value| {
                person.name = value.into_text()?;
                Ok(())
            },
        ))
        .with_field(FieldDescriptor::new(
            Person::NUMBER,
            "number",
            ValueType::UInt,
            |person: &Person| Value::from(person.number),
            |person: &mut Person, value: Value| {
                person.number = value.into_uint()?;
                Ok(())
            },
        ))
        .automatic_cleanup(automatic_cleanup)
}

/// Builds the `group` descriptor; founders live in `people`.
pub fn group_descriptor(people: &Arc<ModelStore<Person>>) -> ModelDescriptor<Group> {
    ModelDescriptor::new("group", Group::default)
        .with_field(FieldDescriptor::new(
            Group::NAME,
            "name",
            ValueType::Text,
            |group: &Group| Value::from(group.name.as_str()),
            |group: &mut Group, value: Value| {
                group.name = value.into_text()?;
                Ok(())
            },
        ))
        .with_field(FieldDescriptor::relation(
            Group::FOUNDER,
            "founder",
            people,
            FieldPolicy::OnDeleteErase,
            |group: &Group| group.founder,
            |group: &mut Group, founder: Option<ModelId>| group.founder = founder,
        ))
}

/// Builds the `organization` descriptor on top of `group`.
pub fn organization_descriptor(
    people: &Arc<ModelStore<Person>>,
    group: &ModelDescriptor<Group>,
) -> ModelDescriptor<Group> {
    ModelDescriptor::extend(group, "organization", || {
        Group::organization(String::new(), None, None)
    })
    .with_field(FieldDescriptor::relation(
        Group::SECRETARY,
        "secretary",
        people,
        FieldPolicy::OnDeleteSetToNull,
        Group::secretary,
        Group::set_secretary,
    ))
    .with_field(FieldDescriptor::relation(
        Group::ACCOUNTANT,
        "accountant",
        people,
        FieldPolicy::OnDeleteSetToNull,
        Group::accountant,
        Group::set_accountant,
    ))
}

/// Knobs for [`Fixture::with_options`].
#[derive(Debug, Clone)]
pub struct FixtureOptions {
    /// Store configuration.
    pub config: Config,
    /// Whether unreferenced people are erased automatically.
    pub person_cleanup: bool,
    /// Membership policy on the person side.
    pub person_policy: ErasePolicy,
    /// Membership policy on the group side.
    pub group_policy: ErasePolicy,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            config: Config::default(),
            person_cleanup: false,
            person_policy: ErasePolicy::None,
            group_policy: ErasePolicy::None,
        }
    }
}

impl FixtureOptions {
    /// Sets the store configuration.
    #[must_use]
    pub const fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Enables automatic cleanup of unreferenced people.
    #[must_use]
    pub const fn person_cleanup(mut self, enabled: bool) -> Self {
        self.person_cleanup = enabled;
        self
    }

    /// Sets the membership policy on the person side.
    #[must_use]
    pub const fn person_policy(mut self, policy: ErasePolicy) -> Self {
        self.person_policy = policy;
        self
    }

    /// Sets the membership policy on the group side.
    #[must_use]
    pub const fn group_policy(mut self, policy: ErasePolicy) -> Self {
        self.group_policy = policy;
        self
    }
}

/// A database with the people, groups and memberships stores.
///
/// Indexes: people by name, by number and by (name, number); groups by
/// name and by (founder, secretary). Every relation field also carries the
/// relation index installed at registration.
pub struct Fixture {
    /// The database owning all stores.
    pub db: Database,
    /// The `people` store.
    pub people: Arc<ModelStore<Person>>,
    /// The `groups` store, holding plain groups and organizations.
    pub groups: Arc<ModelStore<Group>>,
    /// The `memberships` relation between people and groups.
    pub memberships: Arc<RelationStore<Person, Group>>,
}

impl Fixture {
    /// Creates a fixture with default options.
    pub fn new() -> Self {
        Self::with_options(FixtureOptions::default())
    }

    /// Creates a fixture.
    pub fn with_options(options: FixtureOptions) -> Self {
        let db = Database::new(options.config);
        let people = db
            .create_model_store::<Person>("people")
            .expect("Failed to create people store");
        people
            .register_model(person_descriptor(options.person_cleanup))
            .expect("Failed to register person");
        people.add_index(&[Person::NAME]).expect("Failed to index names");
        people
            .add_index(&[Person::NUMBER])
            .expect("Failed to index numbers");
        people
            .add_compound_index(&[Person::NAME, Person::NUMBER])
            .expect("Failed to index name and number");

        let groups = db
            .create_model_store::<Group>("groups")
            .expect("Failed to create groups store");
        let group = group_descriptor(&people);
        let organization = organization_descriptor(&people, &group);
        groups.register_model(group).expect("Failed to register group");
        groups
            .register_model(organization)
            .expect("Failed to register organization");
        groups.add_index(&[Group::NAME]).expect("Failed to index names");
        groups
            .add_compound_index(&[Group::FOUNDER, Group::SECRETARY])
            .expect("Failed to index founder and secretary");

        let memberships = db
            .create_relation_store(
                "memberships",
                &people,
                options.person_policy,
                &groups,
                options.group_policy,
            )
            .expect("Failed to create memberships store");

        Self {
            db,
            people,
            groups,
            memberships,
        }
    }

    /// Stores a new person.
    pub fn add_person(&self, name: &str, number: u64) -> (Handle<Person>, ModelId) {
        let person = Handle::new(Person::new(name, number));
        let id = self.people.store(&person).expect("Failed to store person");
        (person, id)
    }

    /// Stores a new plain group.
    pub fn add_group(&self, name: &str, founder: Option<ModelId>) -> (Handle<Group>, ModelId) {
        let group = Handle::new(Group::new(name, founder));
        let id = self.groups.store(&group).expect("Failed to store group");
        (group, id)
    }

    /// Stores a new organization.
    pub fn add_organization(
        &self,
        name: &str,
        founder: Option<ModelId>,
        secretary: Option<ModelId>,
    ) -> (Handle<Group>, ModelId) {
        let group = Handle::new(Group::organization(name, founder, secretary));
        let id = self.groups.store(&group).expect("Failed to store organization");
        (group, id)
    }

    /// Adds a membership pair.
    pub fn join(&self, person: ModelId, group: ModelId) {
        self.memberships
            .store(person, group)
            .expect("Failed to store membership");
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a fresh [`Fixture`].
///
/// # Example
///
/// ```rust,ignore
/// use modeldb_testkit::with_fixture;
///
/// #[test]
/// fn my_test() {
///     with_fixture(|fx| {
///         let (bob, _) = fx.add_person("bob", 1);
///         // ... test operations
///     });
/// }
/// ```
pub fn with_fixture<F, R>(f: F) -> R
where
    F: FnOnce(&Fixture) -> R,
{
    let fixture = Fixture::new();
    f(&fixture)
}

/// Runs a test with a fresh [`Fixture`] and a temporary directory for
/// save and load.
pub fn with_saved_fixture<F, R>(f: F) -> R
where
    F: FnOnce(&Fixture, &std::path::Path) -> R,
{
    let fixture = Fixture::new();
    let dir = TempDir::new().expect("Failed to create temp directory");
    f(&fixture, dir.path())
}
