//! Administration of language alternatives and their mirrors
//!
//! These operations only edit configuration records. Creating the mirror
//! library, linking files and removing them belongs to the sync engine.

use crate::error::{LibraryError, Result};
use crate::models::{AlternativeId, LanguageAlternative, LibraryMirror, MirrorId};
use crate::store::ConfigurationStore;
use bridge_traits::library::LibraryInfo;
use bridge_traits::time::Clock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

/// Input for [`AlternativeRepository::create_alternative`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlternative {
    pub name: String,
    pub locale_code: String,
    pub metadata_language: String,
    pub metadata_country: String,
    pub destination_base_path: PathBuf,
}

/// Partial update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlternativeUpdate {
    pub name: Option<String>,
    pub locale_code: Option<String>,
    pub metadata_language: Option<String>,
    pub metadata_country: Option<String>,
    pub destination_base_path: Option<PathBuf>,
}

/// Configuration-level CRUD for alternatives and mirrors
pub struct AlternativeRepository {
    store: Arc<ConfigurationStore>,
    clock: Arc<dyn Clock>,
}

impl AlternativeRepository {
    pub fn new(store: Arc<ConfigurationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn list_alternatives(&self) -> Vec<LanguageAlternative> {
        self.store.read(|c| c.alternatives.clone())
    }

    pub fn get_alternative(&self, id: AlternativeId) -> Option<LanguageAlternative> {
        self.store.read(|c| c.alternative(id).cloned())
    }

    /// Mirror with a copy of its owning alternative
    pub fn find_mirror(&self, mirror_id: MirrorId) -> Option<(LanguageAlternative, LibraryMirror)> {
        self.store.read(|c| {
            c.find_mirror(mirror_id)
                .map(|(alt, mirror)| (alt.clone(), mirror.clone()))
        })
    }

    /// Every mirror paired with its alternative id
    pub fn list_mirrors(&self) -> Vec<(AlternativeId, LibraryMirror)> {
        self.store
            .read(|c| c.mirrors().map(|(id, m)| (id, m.clone())).collect())
    }

    #[instrument(skip(self, input), fields(name = %input.name, locale = %input.locale_code))]
    pub async fn create_alternative(&self, input: NewAlternative) -> Result<LanguageAlternative> {
        validate_required("name", &input.name)?;
        validate_required("locale_code", &input.locale_code)?;
        validate_required("metadata_language", &input.metadata_language)?;
        validate_destination(&input.destination_base_path)?;

        let now = self.clock.now();
        let alternative = LanguageAlternative {
            id: AlternativeId::new(),
            name: input.name.trim().to_string(),
            locale_code: input.locale_code.trim().to_string(),
            metadata_language: input.metadata_language.trim().to_string(),
            metadata_country: input.metadata_country.trim().to_string(),
            destination_base_path: input.destination_base_path,
            mirrors: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let created = alternative.clone();
        self.store
            .modify(move |config| {
                ensure_unique_locale(&config.alternatives, &alternative.locale_code, None)?;
                config.alternatives.push(alternative);
                Ok(())
            })
            .await?;

        info!(alternative_id = %created.id, "Created language alternative");
        Ok(created)
    }

    #[instrument(skip(self, update), fields(alternative_id = %id))]
    pub async fn update_alternative(
        &self,
        id: AlternativeId,
        update: AlternativeUpdate,
    ) -> Result<LanguageAlternative> {
        if let Some(name) = &update.name {
            validate_required("name", name)?;
        }
        if let Some(locale) = &update.locale_code {
            validate_required("locale_code", locale)?;
        }
        if let Some(language) = &update.metadata_language {
            validate_required("metadata_language", language)?;
        }
        if let Some(path) = &update.destination_base_path {
            validate_destination(path)?;
        }

        let now = self.clock.now();
        self.store
            .modify(move |config| {
                if let Some(locale) = &update.locale_code {
                    ensure_unique_locale(&config.alternatives, locale.trim(), Some(id))?;
                }

                let alternative = config
                    .alternative_mut(id)
                    .ok_or_else(|| LibraryError::not_found("LanguageAlternative", id))?;

                if let Some(name) = update.name {
                    alternative.name = name.trim().to_string();
                }
                if let Some(locale) = update.locale_code {
                    alternative.locale_code = locale.trim().to_string();
                }
                if let Some(language) = update.metadata_language {
                    alternative.metadata_language = language.trim().to_string();
                }
                if let Some(country) = update.metadata_country {
                    alternative.metadata_country = country.trim().to_string();
                }
                // Existing mirrors keep their target path; only new mirrors use the new base
                if let Some(path) = update.destination_base_path {
                    alternative.destination_base_path = path;
                }
                alternative.updated_at = now;

                Ok(alternative.clone())
            })
            .await
    }

    /// Remove the alternative record and return it.
    ///
    /// Mirror libraries and files are not touched; callers delete the
    /// returned mirrors through the sync engine first when they want that.
    /// Users still pointing at the alternative resolve to the source libraries.
    #[instrument(skip(self), fields(alternative_id = %id))]
    pub async fn delete_alternative(&self, id: AlternativeId) -> Result<LanguageAlternative> {
        let removed = self
            .store
            .modify(move |config| {
                let index = config
                    .alternatives
                    .iter()
                    .position(|a| a.id == id)
                    .ok_or_else(|| LibraryError::not_found("LanguageAlternative", id))?;

                if config.default_alternative_id == Some(id) {
                    config.default_alternative_id = None;
                }

                Ok(config.alternatives.remove(index))
            })
            .await?;

        info!(mirrors = removed.mirrors.len(), "Deleted language alternative");
        Ok(removed)
    }

    /// Register a mirror of `source` under an alternative.
    ///
    /// At most one mirror exists per (alternative, source library). The mirror
    /// is linked into `<destination base>/<sanitized source name>`.
    #[instrument(skip(self, source), fields(alternative_id = %alternative_id, source_library_id = %source.id))]
    pub async fn add_mirror(
        &self,
        alternative_id: AlternativeId,
        source: &LibraryInfo,
    ) -> Result<LibraryMirror> {
        validate_required("source_library_id", &source.id)?;

        let source = source.clone();
        let mirror = self
            .store
            .modify(move |config| {
                let is_existing_target = config
                    .mirrors()
                    .any(|(_, m)| m.target_library_id.as_deref() == Some(source.id.as_str()));
                if is_existing_target {
                    return Err(LibraryError::invalid(
                        "source_library_id",
                        format!("library {} is itself a mirror", source.id),
                    ));
                }

                let alternative = config
                    .alternative(alternative_id)
                    .ok_or_else(|| LibraryError::not_found("LanguageAlternative", alternative_id))?;

                if alternative.mirror_for_source(&source.id).is_some() {
                    return Err(LibraryError::Duplicate {
                        entity_type: "LibraryMirror".to_string(),
                        message: format!(
                            "alternative '{}' already mirrors library {}",
                            alternative.name, source.id
                        ),
                    });
                }

                let target_path = alternative
                    .destination_base_path
                    .join(sanitize_folder_name(&source.name));

                // A mirror nested in its source (or the reverse) would pick up
                // its own links on every sync
                if let Some(location) = source
                    .locations
                    .iter()
                    .find(|l| target_path.starts_with(l) || l.starts_with(&target_path))
                {
                    return Err(LibraryError::invalid(
                        "destination_base_path",
                        format!(
                            "target path {} overlaps source location {}",
                            target_path.display(),
                            location.display()
                        ),
                    ));
                }

                if config.mirrors().any(|(_, m)| m.target_path == target_path) {
                    return Err(LibraryError::Duplicate {
                        entity_type: "LibraryMirror".to_string(),
                        message: format!("target path {} already in use", target_path.display()),
                    });
                }

                let mirror = LibraryMirror::new(
                    source.id.clone(),
                    source.name.clone(),
                    target_path,
                    source.collection_type.clone(),
                );

                let alternative = config
                    .alternative_mut(alternative_id)
                    .ok_or_else(|| LibraryError::not_found("LanguageAlternative", alternative_id))?;
                alternative.mirrors.push(mirror.clone());

                Ok(mirror)
            })
            .await?;

        info!(mirror_id = %mirror.id, target_path = ?mirror.target_path, "Added library mirror");
        Ok(mirror)
    }

    /// Remove a mirror record and return it
    #[instrument(skip(self), fields(mirror_id = %mirror_id))]
    pub async fn remove_mirror(&self, mirror_id: MirrorId) -> Result<LibraryMirror> {
        self.store
            .modify(move |config| {
                for alternative in &mut config.alternatives {
                    if let Some(index) = alternative.mirrors.iter().position(|m| m.id == mirror_id)
                    {
                        return Ok(alternative.mirrors.remove(index));
                    }
                }
                Err(LibraryError::not_found("LibraryMirror", mirror_id))
            })
            .await
    }

    /// Apply a state change to a mirror and return the updated copy
    pub async fn update_mirror<F>(&self, mirror_id: MirrorId, change: F) -> Result<LibraryMirror>
    where
        F: FnOnce(&mut LibraryMirror) -> Result<()>,
    {
        self.store
            .modify(move |config| {
                let mirror = config
                    .find_mirror_mut(mirror_id)
                    .ok_or_else(|| LibraryError::not_found("LibraryMirror", mirror_id))?;
                change(mirror)?;
                Ok(mirror.clone())
            })
            .await
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<ConfigurationStore> {
        &self.store
    }
}

fn validate_required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LibraryError::invalid(field, "must not be empty"));
    }
    Ok(())
}

fn validate_destination(path: &std::path::Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(LibraryError::invalid(
            "destination_base_path",
            format!("{} is not an absolute path", path.display()),
        ));
    }
    Ok(())
}

fn ensure_unique_locale(
    alternatives: &[LanguageAlternative],
    locale_code: &str,
    except: Option<AlternativeId>,
) -> Result<()> {
    let taken = alternatives
        .iter()
        .filter(|a| Some(a.id) != except)
        .any(|a| a.locale_code.eq_ignore_ascii_case(locale_code.trim()));

    if taken {
        return Err(LibraryError::Duplicate {
            entity_type: "LanguageAlternative".to_string(),
            message: format!("locale code '{}' is already used", locale_code.trim()),
        });
    }
    Ok(())
}

/// Turn a library display name into a single safe path component
pub fn sanitize_folder_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        "library".to_string()
    } else {
        trimmed.to_string()
    }
}
