pub mod logger;

/// Canonical path form used for every map key: ASCII lowercased, forward
/// slashes folded to backslashes. Non-ASCII characters pass through
/// untouched; callers that require ASCII check separately and reject.
pub fn canonicalize_path(path: &str) -> String {
    path.chars()
        .map(|c| match c {
            '/' => '\\',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

pub fn contains_only_ascii(value: &str) -> bool {
    value.is_ascii()
}

/// File name stem (no directory, no extension) of a canonical path.
pub fn path_stem(canonical: &str) -> &str {
    let file = canonical.rsplit('\\').next().unwrap_or(canonical);
    match file.rfind('.') {
        Some(idx) if idx > 0 => &file[..idx],
        _ => file,
    }
}

/// Strips the extension of a canonical path, keeping the directory part.
pub fn strip_extension(canonical: &str) -> &str {
    let dot = canonical.rfind('.');
    let sep = canonical.rfind('\\');
    match (dot, sep) {
        (Some(d), Some(s)) if d > s => &canonical[..d],
        (Some(d), None) if d > 0 => &canonical[..d],
        _ => canonical,
    }
}

/// Replaces the extension of a canonical path.
pub fn with_extension(canonical: &str, ext: &str) -> String {
    format!("{}.{}", strip_extension(canonical), ext)
}

/// First path component and the rest, split on the first backslash.
pub fn split_first_component(canonical: &str) -> (&str, &str) {
    match canonical.find('\\') {
        Some(idx) => (&canonical[..idx], &canonical[idx + 1..]),
        None => (canonical, ""),
    }
}

/// Case-insensitive glob match over canonical (backslash) paths. The glob
/// crate treats backslash as an escape, so both sides are normalized to
/// forward slashes first.
pub fn glob_match_any(value: &str, globs: &[String]) -> bool {
    let normalized = value.replace('\\', "/");
    let options = glob::MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };

    globs.iter().any(|pattern| {
        let pattern = pattern.replace('\\', "/");
        glob::Pattern::new(&pattern)
            .map(|p| p.matches_with(&normalized, options))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_lowercases_and_flips_separators() {
        assert_eq!(canonicalize_path("Textures/Rock/Rock_D.DDS"), "textures\\rock\\rock_d.dds");
        // idempotent
        let canonical = canonicalize_path("MESHES\\Test.NIF");
        assert_eq!(canonicalize_path(&canonical), canonical);
    }

    #[test]
    fn canonicalize_leaves_non_ascii_alone() {
        assert_eq!(canonicalize_path("textures\\Tést.dds"), "textures\\tést.dds");
        assert!(!contains_only_ascii("textures\\tést.dds"));
    }

    #[test]
    fn stem_and_extension_helpers() {
        assert_eq!(path_stem("textures\\rock\\rock_d.dds"), "rock_d");
        assert_eq!(strip_extension("textures\\rock_d.dds"), "textures\\rock_d");
        assert_eq!(with_extension("textures\\rock_m.dds", "json"), "textures\\rock_m.json");
        assert_eq!(split_first_component("meshes\\clutter\\test.nif"), ("meshes", "clutter\\test.nif"));
    }

    #[test]
    fn glob_matching_is_case_insensitive() {
        let globs = vec!["meshes\\actors\\*".to_string()];
        assert!(glob_match_any("meshes\\Actors\\wolf.nif", &globs));
        assert!(!glob_match_any("meshes\\clutter\\pot.nif", &globs));
        assert!(glob_match_any("MESHES\\ACTORS\\x\\y.nif", &globs));
    }
}
