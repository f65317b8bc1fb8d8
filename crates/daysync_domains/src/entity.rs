//! Single-entity domains: food tracker, diary and ideas.
//!
//! Each of these views stores one kind of record and accepts exactly three
//! mutations (create, update, delete). They differ only in key prefix,
//! mutation names and fields, so one collaborator serves all three, driven by
//! an [`EntitySchema`].

use crate::store::EntityStore;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use daysync_protocol::PatchOp;
use daysync_server::{DomainCollaborator, DomainError};
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

/// Value a field takes when a create omits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    /// `null`
    Null,
    /// `""`
    Text,
    /// `false`
    Flag,
    /// `0`
    Zero,
    /// `[]`
    List,
}

impl FieldDefault {
    fn value(self) -> Value {
        match self {
            FieldDefault::Null => Value::Null,
            FieldDefault::Text => json!(""),
            FieldDefault::Flag => json!(false),
            FieldDefault::Zero => json!(0),
            FieldDefault::List => json!([]),
        }
    }
}

/// One field of an entity, named as on the wire.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    /// Wire name, e.g. `imageUrl`.
    pub name: &'static str,
    /// Value used when a create omits the field.
    pub default: FieldDefault,
}

impl Field {
    /// Creates a field.
    pub const fn new(name: &'static str, default: FieldDefault) -> Self {
        Self { name, default }
    }
}

/// Shape of a single-entity domain.
#[derive(Debug, Clone, Copy)]
pub struct EntitySchema {
    /// Key prefix, including the slash.
    pub prefix: &'static str,
    /// Name of the create mutation.
    pub create: &'static str,
    /// Name of the update mutation.
    pub update: &'static str,
    /// Name of the delete mutation.
    pub delete: &'static str,
    /// Fields besides `id`.
    pub fields: &'static [Field],
    /// Stamp `createdAt` on create and `updatedAt` on create and update.
    pub timestamps: bool,
}

impl EntitySchema {
    /// Returns the patch key of an entity.
    pub fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Builds a new entity from create arguments.
    pub fn build(&self, id: &str, args: &Map<String, Value>) -> Value {
        let mut entity = Map::new();
        entity.insert("id".into(), json!(id));
        for field in self.fields {
            let value = args
                .get(field.name)
                .cloned()
                .unwrap_or_else(|| field.default.value());
            entity.insert(field.name.into(), value);
        }
        if self.timestamps {
            let now = json!(timestamp());
            entity.insert("createdAt".into(), now.clone());
            entity.insert("updatedAt".into(), now);
        }
        Value::Object(entity)
    }

    /// Picks the known fields present in update arguments.
    pub fn changes(&self, args: &Map<String, Value>) -> Map<String, Value> {
        let mut changes = pick(args, self.fields.iter().map(|field| field.name));
        if self.timestamps {
            changes.insert("updatedAt".into(), json!(timestamp()));
        }
        changes
    }
}

/// Food tracker entries.
pub const FOOD_ENTRY: EntitySchema = EntitySchema {
    prefix: "food-entry/",
    create: "createEntry",
    update: "updateEntry",
    delete: "deleteEntry",
    fields: &[
        Field::new("name", FieldDefault::Text),
        Field::new("price", FieldDefault::Null),
        Field::new("description", FieldDefault::Text),
        Field::new("imageUrl", FieldDefault::Null),
        Field::new("date", FieldDefault::Null),
    ],
    timestamps: false,
};

/// Diary entries.
pub const DIARY_ENTRY: EntitySchema = EntitySchema {
    prefix: "diary-entry/",
    create: "createEntry",
    update: "updateEntry",
    delete: "deleteEntry",
    fields: &[
        Field::new("title", FieldDefault::Text),
        Field::new("content", FieldDefault::Text),
        Field::new("moodId", FieldDefault::Null),
        Field::new("date", FieldDefault::Null),
    ],
    timestamps: true,
};

/// Ideas.
pub const IDEA: EntitySchema = EntitySchema {
    prefix: "idea/",
    create: "createIdea",
    update: "updateIdea",
    delete: "deleteIdea",
    fields: &[
        Field::new("title", FieldDefault::Text),
        Field::new("description", FieldDefault::Text),
        Field::new("categoryId", FieldDefault::Null),
        Field::new("tags", FieldDefault::List),
        Field::new("isArchived", FieldDefault::Flag),
    ],
    timestamps: true,
};

/// In-memory collaborator for a single-entity view.
#[derive(Debug)]
pub struct EntityDomain {
    schema: EntitySchema,
    store: EntityStore,
}

impl EntityDomain {
    /// Creates an empty domain with the given schema.
    pub fn new(schema: EntitySchema) -> Self {
        Self {
            schema,
            store: EntityStore::new(),
        }
    }

    /// Food tracker (`food-tracker-replicache`).
    pub fn food_tracker() -> Self {
        Self::new(FOOD_ENTRY)
    }

    /// Diary (`diary-replicache`).
    pub fn diary() -> Self {
        Self::new(DIARY_ENTRY)
    }

    /// Ideas (`ideas-replicache`).
    pub fn ideas() -> Self {
        Self::new(IDEA)
    }

    /// Returns the schema.
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Returns a stored entity.
    pub fn get(&self, user_id: &str, id: &str) -> Option<Value> {
        let key = self.schema.key(id);
        self.store.read(user_id, |entities| entities.get(&key).cloned())
    }
}

#[async_trait]
impl DomainCollaborator for EntityDomain {
    async fn apply_mutation(&self, name: &str, args: &Value, user_id: &str) -> Result<(), DomainError> {
        let args = arguments(args)?;
        let schema = &self.schema;

        let key = if name == schema.create {
            let id = entity_id(args, true)?;
            let key = schema.key(&id);
            let entity = schema.build(&id, args);
            self.store.write(user_id, |e| e.insert(key.clone(), entity))?;
            key
        } else if name == schema.update {
            let key = schema.key(&entity_id(args, false)?);
            let changes = schema.changes(args);
            self.store.write(user_id, |e| e.update(&key, changes))?;
            key
        } else if name == schema.delete {
            let key = schema.key(&entity_id(args, false)?);
            self.store.write(user_id, |e| e.remove(&key))?;
            key
        } else {
            return Err(DomainError::Rejected(format!("unknown mutation {name}")));
        };

        debug!(user_id, mutation = name, key = %key, "mutation applied");
        Ok(())
    }

    async fn build_patch(&self, user_id: &str) -> Result<Vec<PatchOp>, DomainError> {
        Ok(self.store.patch(user_id))
    }
}

/// RFC 3339 UTC time with millisecond precision.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Returns the argument object of a mutation.
pub(crate) fn arguments(args: &Value) -> Result<&Map<String, Value>, DomainError> {
    args.as_object()
        .ok_or_else(|| DomainError::Rejected("arguments must be an object".into()))
}

/// Reads the `id` argument. A create without one gets a fresh id.
pub(crate) fn entity_id(args: &Map<String, Value>, generate: bool) -> Result<String, DomainError> {
    match args.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        None | Some(Value::Null) if generate => Ok(Uuid::new_v4().to_string()),
        _ => Err(DomainError::Rejected("missing or invalid id".into())),
    }
}

/// Copies the named entries present in `args`.
pub(crate) fn pick<'a>(
    args: &Map<String, Value>,
    names: impl IntoIterator<Item = &'a str>,
) -> Map<String, Value> {
    names
        .into_iter()
        .filter_map(|name| args.get(name).map(|value| (name.to_string(), value.clone())))
        .collect()
}
