//! Pure computation of the libraries a managed user should see

use core_library::models::PluginConfiguration;
use std::collections::HashSet;

/// Library ids a user should be able to open, restricted to libraries this
/// configuration manages.
///
/// Returns `None` when the user is not managed (no record, or the record
/// opts out). Callers must then leave the user's permissions alone.
///
/// For every managed source the user sees the mirror of their alternative
/// when that mirror is ready, otherwise the source itself. A selected
/// alternative that no longer exists resolves like no selection. When
/// `live_library_ids` is given, mirrors whose library is gone are not ready
/// and sources that are gone are left out.
pub fn resolve_expected_access(
    config: &PluginConfiguration,
    user_id: &str,
    live_library_ids: Option<&HashSet<String>>,
) -> Option<HashSet<String>> {
    let user = config
        .user_config(user_id)
        .filter(|user| user.is_plugin_managed)?;

    let alternative = user
        .selected_alternative_id
        .and_then(|id| config.alternative(id));
    let is_live = |id: &str| live_library_ids.map_or(true, |live| live.contains(id));

    let mut expected = HashSet::new();
    for source_id in config.managed_source_ids() {
        let ready_target = alternative
            .and_then(|alt| alt.mirror_for_source(&source_id))
            .filter(|mirror| mirror.is_ready())
            .and_then(|mirror| mirror.target_library_id.clone())
            .filter(|target| is_live(target));

        match ready_target {
            Some(target) => {
                expected.insert(target);
            }
            None if is_live(&source_id) => {
                expected.insert(source_id);
            }
            None => {}
        }
    }

    Some(expected)
}
