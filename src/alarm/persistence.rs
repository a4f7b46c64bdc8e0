use thiserror::Error;

use crate::alarm::model::{
    ClusterParams, ClusterProfile, ProfileCodecError, deserialize_draft, deserialize_profile,
    serialize_draft, serialize_profile,
};
use crate::store::{ALARM_PROFILE_KEY, CLUSTER_DRAFT_KEY, KeyValueStore, StorageError};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("stored {key} is unreadable: {source}")]
    Codec {
        key: &'static str,
        #[source]
        source: ProfileCodecError,
    },
}

pub fn load_profile<S>(store: &S) -> Result<Option<ClusterProfile>, PersistenceError>
where
    S: KeyValueStore + ?Sized,
{
    let Some(text) = store.get(ALARM_PROFILE_KEY)? else {
        return Ok(None);
    };
    deserialize_profile(&text)
        .map(Some)
        .map_err(|source| PersistenceError::Codec {
            key: ALARM_PROFILE_KEY,
            source,
        })
}

/// Overwrites any stored profile; only one cluster exists at a time.
pub fn save_profile<S>(store: &mut S, profile: &ClusterProfile) -> Result<(), PersistenceError>
where
    S: KeyValueStore + ?Sized,
{
    let text = serialize_profile(profile).map_err(|source| PersistenceError::Codec {
        key: ALARM_PROFILE_KEY,
        source,
    })?;
    store.set(ALARM_PROFILE_KEY, &text)?;
    Ok(())
}

pub fn delete_profile<S>(store: &mut S) -> Result<bool, PersistenceError>
where
    S: KeyValueStore + ?Sized,
{
    Ok(store.remove(ALARM_PROFILE_KEY)?)
}

pub fn load_draft<S>(store: &S) -> Result<Option<ClusterParams>, PersistenceError>
where
    S: KeyValueStore + ?Sized,
{
    let Some(text) = store.get(CLUSTER_DRAFT_KEY)? else {
        return Ok(None);
    };
    deserialize_draft(&text)
        .map(Some)
        .map_err(|source| PersistenceError::Codec {
            key: CLUSTER_DRAFT_KEY,
            source,
        })
}

pub fn save_draft<S>(store: &mut S, draft: &ClusterParams) -> Result<(), PersistenceError>
where
    S: KeyValueStore + ?Sized,
{
    let text = serialize_draft(draft).map_err(|source| PersistenceError::Codec {
        key: CLUSTER_DRAFT_KEY,
        source,
    })?;
    store.set(CLUSTER_DRAFT_KEY, &text)?;
    Ok(())
}
