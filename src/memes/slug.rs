use uuid::Uuid;

/// URL-safe form of a meme name: transliterated to ASCII, lower-case,
/// dash-separated. Names with nothing to transliterate fall back to
/// `meme-<first 8 hex digits of the id>`.
pub fn slugify(name: &str, id: Uuid) -> String {
    let slug = ::slug::slugify(name);
    if slug.is_empty() {
        let simple = id.simple().to_string();
        format!("meme-{}", &simple[..8])
    } else {
        slug
    }
}
