use std::collections::HashSet;
use url::Url;

/// Lowercased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Token-set Jaccard similarity in [0,1].
pub fn token_set_jaccard(left: &str, right: &str) -> f32 {
    let left_tokens: HashSet<String> = tokenize(left).into_iter().collect();
    let right_tokens: HashSet<String> = tokenize(right).into_iter().collect();
    if left_tokens.is_empty() && right_tokens.is_empty() {
        return 0.0;
    }
    let intersection = left_tokens.intersection(&right_tokens).count();
    let union = left_tokens.union(&right_tokens).count();
    intersection as f32 / union as f32
}

/// Character-trigram Jaccard similarity over the lowercased input.
pub fn trigram_similarity(left: &str, right: &str) -> f32 {
    let left_grams = trigrams(left);
    let right_grams = trigrams(right);
    if left_grams.is_empty() && right_grams.is_empty() {
        return 0.0;
    }
    let intersection = left_grams.intersection(&right_grams).count();
    let union = left_grams.union(&right_grams).count();
    intersection as f32 / union as f32
}

fn trigrams(text: &str) -> HashSet<String> {
    let normalised: Vec<char> = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    normalised
        .windows(3)
        .map(|window| window.iter().collect::<String>())
        .collect()
}

/// True for version-shaped tokens: `v1`, `1.2.3`, `v18`, `2024`.
pub fn is_version_token(token: &str) -> bool {
    let body = token.strip_prefix('v').unwrap_or(token);
    !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.chars().any(|c| c.is_ascii_digit())
}

/// Name with version tokens removed, plus whether any were present.
/// "React 18" and "React 17" both reduce to the stem "react".
pub fn version_stem(name: &str) -> (String, bool) {
    let mut stripped_any = false;
    let stem: Vec<String> = tokenize(name)
        .into_iter()
        .filter(|token| {
            if is_version_token(token) {
                stripped_any = true;
                false
            } else {
                true
            }
        })
        .collect();
    (stem.join(" "), stripped_any)
}

/// Canonical URL form for exact-URL matching: lowercased scheme and host,
/// `www.` and default ports and trailing slashes stripped, fragment dropped.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    let mut canonical = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        canonical.push_str(&format!(":{port}"));
    }
    let path = parsed.path().trim_end_matches('/');
    canonical.push_str(path);
    if let Some(query) = parsed.query() {
        canonical.push('?');
        canonical.push_str(query);
    }
    Some(canonical)
}
