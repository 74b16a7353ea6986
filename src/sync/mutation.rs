//! Applying remote mutations to local objects
//!
//! Listeners of the target are suspended while a mutation is applied so the
//! change is not echoed back onto the network.

use crate::error::{SyncError, SyncResult};
use crate::registry::Registry;
use crate::serialize::{CollectionAction, CollectionChange, FieldError, NetworkList, ObjectRef, Value};

/// Set one property of a registered object
pub fn apply_property(registry: &Registry, target: &ObjectRef, property: &str, value: Value) -> SyncResult<()> {
    registry.safe(std::slice::from_ref(target), || target.set(property, value))?;
    Ok(())
}

/// Apply a collection change with index accurate semantics
pub fn apply_collection(registry: &Registry, target: &ObjectRef, change: &CollectionChange) -> SyncResult<()> {
    let list = target
        .as_list()
        .ok_or_else(|| SyncError::NotACollection(target.type_name().to_string()))?;
    registry.safe(std::slice::from_ref(target), || splice(list, change))?;
    Ok(())
}

fn index(i: i32) -> Result<usize, FieldError> {
    usize::try_from(i).map_err(|_| FieldError::NegativeIndex(i))
}

/// Apply `change` to `list`
pub fn splice(list: &dyn NetworkList, change: &CollectionChange) -> Result<(), FieldError> {
    match change.action {
        CollectionAction::Add => {
            let start = index(change.new_index)?;
            for (i, item) in change.items.iter().enumerate() {
                list.insert(start + i, item.clone())?;
            }
        }
        CollectionAction::Remove => {
            let start = index(change.old_index)?;
            let count = if change.old_count > 0 {
                change.old_count as usize
            } else {
                change.items.len()
            };
            for _ in 0..count {
                list.remove_at(start)?;
            }
        }
        CollectionAction::Replace => {
            let start = if change.new_index >= 0 {
                change.new_index
            } else {
                change.old_index
            };
            let start = index(start)?;
            for (i, item) in change.items.iter().enumerate() {
                list.replace(start + i, item.clone())?;
            }
        }
        CollectionAction::Move => {
            let from = index(change.old_index)?;
            let to = index(change.new_index)?;
            for i in 0..change.items.len() {
                let offset = if from > to { i } else { 0 };
                let item = list.remove_at(from + offset)?;
                list.insert(to + i, item)?;
            }
        }
        CollectionAction::Reset => list.clear(),
    }
    Ok(())
}
