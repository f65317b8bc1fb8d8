//! Todo lists (`todo-replicache-flat`).
//!
//! A list is either a task list or a shopping list. Items of a task list are
//! stored under `task/{id}`, items of a shopping list under `item/{id}`;
//! clients use one set of item mutations for both.

use crate::entity::{arguments, entity_id, pick};
use crate::store::{EntityStore, UserEntities};
use async_trait::async_trait;
use daysync_protocol::PatchOp;
use daysync_server::{DomainCollaborator, DomainError};
use serde_json::{json, Map, Value};
use tracing::debug;

const LIST_PREFIX: &str = "list/";
const TASK_PREFIX: &str = "task/";
const ITEM_PREFIX: &str = "item/";

const LIST_FIELDS: [&str; 2] = ["title", "variant"];
const TASK_FIELDS: [&str; 5] = ["title", "description", "completed", "order", "variant"];
const SHOPPING_FIELDS: [&str; 7] = ["title", "url", "price", "source", "completed", "order", "variant"];

/// Kind of a todo list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Plain tasks.
    Task,
    /// Shopping items.
    Shopping,
}

impl ListKind {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Task => "task",
            ListKind::Shopping => "shopping",
        }
    }

    fn parse(value: Option<&Value>) -> Result<Self, DomainError> {
        match value.and_then(Value::as_str) {
            None | Some("task") => Ok(ListKind::Task),
            Some("shopping") => Ok(ListKind::Shopping),
            Some(other) => Err(DomainError::Rejected(format!("unknown list type {other}"))),
        }
    }

    fn item_prefix(&self) -> &'static str {
        match self {
            ListKind::Task => TASK_PREFIX,
            ListKind::Shopping => ITEM_PREFIX,
        }
    }

    fn item_fields(&self) -> &'static [&'static str] {
        match self {
            ListKind::Task => &TASK_FIELDS,
            ListKind::Shopping => &SHOPPING_FIELDS,
        }
    }
}

/// In-memory collaborator for todo and shopping lists.
#[derive(Debug, Default)]
pub struct TodoDomain {
    store: EntityStore,
}

impl TodoDomain {
    /// Creates an empty domain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a stored entity by full key (`list/1`, `task/2`).
    pub fn get(&self, user_id: &str, key: &str) -> Option<Value> {
        self.store.read(user_id, |entities| entities.get(key).cloned())
    }
}

#[async_trait]
impl DomainCollaborator for TodoDomain {
    async fn apply_mutation(&self, name: &str, args: &Value, user_id: &str) -> Result<(), DomainError> {
        let args = arguments(args)?;
        self.store.write(user_id, |entities| match name {
            "createList" => create_list(entities, args),
            "updateList" => {
                let id = entity_id(args, false)?;
                entities.update(&format!("{LIST_PREFIX}{id}"), pick(args, LIST_FIELDS))
            }
            "deleteList" => delete_list(entities, args),
            "createItem" => create_item(entities, args),
            "updateItem" => {
                let key = locate_item(entities, args)?;
                let kind = if key.starts_with(TASK_PREFIX) {
                    ListKind::Task
                } else {
                    ListKind::Shopping
                };
                entities.update(&key, pick(args, kind.item_fields().iter().copied()))
            }
            "deleteItem" => {
                let key = locate_item(entities, args)?;
                entities.remove(&key).map(|_| ())
            }
            other => Err(DomainError::Rejected(format!("unknown mutation {other}"))),
        })?;

        debug!(user_id, mutation = name, "mutation applied");
        Ok(())
    }

    async fn build_patch(&self, user_id: &str) -> Result<Vec<PatchOp>, DomainError> {
        Ok(self.store.patch(user_id))
    }
}

fn create_list(entities: &mut UserEntities, args: &Map<String, Value>) -> Result<(), DomainError> {
    let id = entity_id(args, true)?;
    let kind = ListKind::parse(args.get("type"))?;
    let list = json!({
        "id": id,
        "type": kind.as_str(),
        "title": args.get("title").cloned().unwrap_or_else(|| json!("")),
        "variant": args.get("variant").cloned().unwrap_or(Value::Null)
    });
    entities.insert(format!("{LIST_PREFIX}{id}"), list)
}

/// Deletes a list together with every item that belongs to it.
fn delete_list(entities: &mut UserEntities, args: &Map<String, Value>) -> Result<(), DomainError> {
    let id = entity_id(args, false)?;
    let list = entities.remove(&format!("{LIST_PREFIX}{id}"))?;
    let kind = ListKind::parse(list.get("type"))?;
    entities.remove_where(kind.item_prefix(), |item| item["listId"] == id.as_str());
    Ok(())
}

fn create_item(entities: &mut UserEntities, args: &Map<String, Value>) -> Result<(), DomainError> {
    let id = entity_id(args, true)?;
    let list_id = match args.get("listId") {
        Some(Value::String(list_id)) => list_id.clone(),
        Some(Value::Number(list_id)) => list_id.to_string(),
        _ => return Err(DomainError::Rejected("missing listId".into())),
    };
    let list = entities
        .get(&format!("{LIST_PREFIX}{list_id}"))
        .ok_or_else(|| DomainError::NotFound(format!("{LIST_PREFIX}{list_id}")))?;
    let kind = ListKind::parse(list.get("type"))?;

    let mut item = Map::new();
    item.insert("id".into(), json!(id));
    item.insert("listId".into(), json!(list_id));
    for field in kind.item_fields() {
        let value = args.get(*field).cloned().unwrap_or_else(|| match *field {
            "title" | "description" => json!(""),
            "completed" => json!(false),
            "order" => json!(0),
            _ => Value::Null,
        });
        item.insert((*field).into(), value);
    }
    entities.insert(format!("{}{id}", kind.item_prefix()), Value::Object(item))
}

/// Finds an item by id, trying task lists first.
fn locate_item(entities: &UserEntities, args: &Map<String, Value>) -> Result<String, DomainError> {
    let id = entity_id(args, false)?;
    [TASK_PREFIX, ITEM_PREFIX]
        .iter()
        .map(|prefix| format!("{prefix}{id}"))
        .find(|key| entities.contains(key))
        .ok_or_else(|| DomainError::NotFound(format!("item {id}")))
}
