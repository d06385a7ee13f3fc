//! Decides which paths of a source tree end up in a mirror
//!
//! Per-language metadata (`.nfo` files, posters, `metadata/` folders) must not
//! be shared between the source and its mirrors, otherwise the host would
//! show the same language everywhere. Media, audio and subtitle files are
//! linked; language-independent asset folders such as trickplay are linked
//! wholesale.

use core_library::models::FileClassificationSettings;
use std::collections::HashSet;
use std::path::Path;

/// Outcome of classifying one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Link the file, or descend into the directory
    Link,
    /// Do not link the file, or prune the whole directory subtree
    Skip,
    /// Directory whose every descendant is linked regardless of extension
    ForceLinkAll,
}

/// Pure path classifier built from [`FileClassificationSettings`]
#[derive(Debug, Clone)]
pub struct FileClassifier {
    excluded_extensions: HashSet<String>,
    excluded_directories: Vec<String>,
    included_directories: Vec<String>,
}

impl FileClassifier {
    pub fn new(settings: &FileClassificationSettings) -> Self {
        let settings = settings.normalized();
        Self {
            excluded_extensions: settings.excluded_extensions.into_iter().collect(),
            excluded_directories: settings.excluded_directories,
            included_directories: settings.included_directories,
        }
    }

    /// Classify a path by its final component.
    ///
    /// Included directories win over excluded ones.
    pub fn classify(&self, path: &Path, is_directory: bool) -> Classification {
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_lowercase(),
            None => return Classification::Link,
        };

        if is_directory {
            if matches_any(&name, &self.included_directories) {
                Classification::ForceLinkAll
            } else if matches_any(&name, &self.excluded_directories) {
                Classification::Skip
            } else {
                Classification::Link
            }
        } else if self.has_excluded_extension(&name) {
            Classification::Skip
        } else {
            Classification::Link
        }
    }

    /// Classify a path relative to a mirror root, taking its ancestors into
    /// account.
    ///
    /// The first ancestor directory that is skipped or force-linked decides;
    /// otherwise the final component does. Files under a force-linked
    /// directory classify as [`Classification::Link`].
    pub fn classify_relative(&self, relative: &Path, is_directory: bool) -> Classification {
        let components: Vec<_> = relative.components().collect();
        let Some((last, ancestors)) = components.split_last() else {
            return Classification::Link;
        };

        for component in ancestors {
            match self.classify(Path::new(component.as_os_str()), true) {
                Classification::Skip => return Classification::Skip,
                Classification::ForceLinkAll => return Classification::Link,
                Classification::Link => {}
            }
        }

        match self.classify(Path::new(last.as_os_str()), is_directory) {
            Classification::ForceLinkAll if !is_directory => Classification::Link,
            other => other,
        }
    }

    fn has_excluded_extension(&self, file_name: &str) -> bool {
        match file_name.rfind('.') {
            Some(index) if index > 0 => self.excluded_extensions.contains(&file_name[index..]),
            _ => false,
        }
    }
}

impl Default for FileClassifier {
    fn default() -> Self {
        Self::new(&FileClassificationSettings::default())
    }
}

/// Exact name match; dotted entries also match as a suffix (`movie.trickplay`)
fn matches_any(name: &str, entries: &[String]) -> bool {
    entries
        .iter()
        .any(|entry| name == entry || (entry.starts_with('.') && name.ends_with(entry.as_str())))
}
