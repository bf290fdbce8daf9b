use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::validate::{validate_property, validate_user};
use super::{Engine, EngineError};

/// Sign-up details for a new account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub id: Ulid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub is_host: bool,
}

impl Engine {
    // ── Users ────────────────────────────────────────────────

    pub async fn register_user(&self, new: NewUser) -> Result<User, EngineError> {
        let user = User {
            id: new.id,
            email: new.email.trim().to_lowercase(),
            first_name: new.first_name.trim().to_string(),
            last_name: new.last_name.trim().to_string(),
            phone: new.phone,
            is_host: new.is_host,
            is_verified: false,
            joined_at: now_ms(),
        };
        validate_user(&user)?;

        let _catalog = self.catalog.lock().await;
        if self.store.user_count() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.store.get_user(&user.id).is_some() {
            return Err(EngineError::AlreadyExists(user.id));
        }
        if self.store.user_id_by_email(&user.email).is_some() {
            return Err(EngineError::Duplicate(format!("email: {}", user.email)));
        }
        self.persist_catalog(&Event::UserRegistered { user: user.clone() })
            .await?;
        tracing::info!("user {} registered", user.id);
        Ok(user)
    }

    pub async fn update_user(&self, id: Ulid, patch: UserPatch) -> Result<User, EngineError> {
        let _catalog = self.catalog.lock().await;
        let mut user = self
            .store
            .get_user(&id)
            .ok_or(EngineError::NotFound("user", id))?;
        patch.apply_to(&mut user);
        validate_user(&user)?;
        self.persist_catalog(&Event::UserUpdated { user: user.clone() })
            .await?;
        Ok(user)
    }

    // ── Properties ───────────────────────────────────────────

    /// Publish a listing. The host must exist and is marked as a host if not
    /// already. `is_active` and `created_at` are set here.
    pub async fn list_property(&self, mut property: Property) -> Result<Property, EngineError> {
        property.is_active = true;
        property.created_at = now_ms();
        validate_property(&property)?;

        let _catalog = self.catalog.lock().await;
        if self.store.property_count() >= MAX_PROPERTIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many properties"));
        }
        if self.store.contains_property(&property.id) {
            return Err(EngineError::AlreadyExists(property.id));
        }
        let mut host = self
            .store
            .get_user(&property.host_id)
            .ok_or(EngineError::NotFound("host", property.host_id))?;

        if !host.is_host {
            host.is_host = true;
            self.persist_catalog(&Event::UserUpdated { user: host }).await?;
        }
        self.persist_catalog(&Event::PropertyListed {
            property: property.clone(),
        })
        .await?;
        tracing::info!("property {} listed by {}", property.id, property.host_id);
        Ok(property)
    }

    /// Apply a host's edits. The patched listing is re-validated as a whole.
    pub async fn update_property(
        &self,
        caller: Ulid,
        id: Ulid,
        patch: PropertyPatch,
    ) -> Result<Property, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::invalid("no fields to update"));
        }
        let mut guard = self.property_write(id).await?;
        if guard.listing.host_id != caller {
            return Err(EngineError::Forbidden("only the host may modify a listing"));
        }
        let mut property = guard.listing.clone();
        patch.apply_to(&mut property);
        validate_property(&property)?;

        let event = Event::PropertyUpdated {
            property: property.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(property)
    }

    /// Soft delete: the listing stays on record but no longer takes bookings
    /// or appears in search.
    pub async fn deactivate_property(&self, caller: Ulid, id: Ulid) -> Result<Property, EngineError> {
        let mut guard = self.property_write(id).await?;
        if guard.listing.host_id != caller {
            return Err(EngineError::Forbidden("only the host may remove a listing"));
        }
        if !guard.listing.is_active {
            return Ok(guard.listing.clone());
        }
        let mut property = guard.listing.clone();
        property.is_active = false;

        let event = Event::PropertyUpdated {
            property: property.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!("property {id} deactivated");
        Ok(property)
    }
}
