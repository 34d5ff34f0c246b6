use toolhub_models::{Record, VectorSpace};

/// Assemble the text embedded for one record in one space. Weighted
/// repetition controls the relative mass of each field inside the vector.
///
/// Returns None when the space's sole input is missing on this record; the
/// record is then skipped for that space only.
pub fn assemble_text(record: &Record, space: VectorSpace) -> Option<String> {
    let text = match space {
        VectorSpace::Semantic => {
            let mut parts = Vec::new();
            push_repeated(&mut parts, &record.description, 3);
            if let Some(long_description) = &record.long_description {
                parts.push(long_description.clone());
            }
            push_repeated(&mut parts, &record.use_cases.join(" "), 2);
            push_repeated(&mut parts, &record.name, 2);
            parts.push(record.categories.join(" "));
            parts.push(record.functionality.join(" "));
            join_parts(parts)
        }
        VectorSpace::EntityCategories => {
            if record.categories.is_empty() {
                return None;
            }
            repeat(&record.categories.join(" "), 5)
        }
        VectorSpace::EntityFunctionality => {
            if record.functionality.is_empty() {
                return None;
            }
            repeat(&record.functionality.join(" "), 5)
        }
        VectorSpace::EntityAliases => {
            let mut parts = Vec::new();
            push_repeated(&mut parts, &record.name, 5);
            push_repeated(&mut parts, &record.search_keywords.join(" "), 3);
            parts.push(record.description.clone());
            join_parts(parts)
        }
        VectorSpace::CompositeToolType => {
            if record.categories.is_empty()
                && record.functionality.is_empty()
                && record.interfaces.is_empty()
                && record.deployment.is_empty()
            {
                return None;
            }
            let mut parts = Vec::new();
            push_repeated(&mut parts, &record.categories.join(" "), 3);
            push_repeated(&mut parts, &record.functionality.join(" "), 3);
            push_repeated(&mut parts, &record.interfaces.join(" "), 2);
            push_repeated(&mut parts, &record.deployment.join(" "), 2);
            parts.push(record.name.clone());
            join_parts(parts)
        }
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn repeat(text: &str, times: usize) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    vec![text.trim(); times].join(" ")
}

fn push_repeated(parts: &mut Vec<String>, text: &str, times: usize) {
    if !text.trim().is_empty() {
        parts.push(repeat(text, times));
    }
}

fn join_parts(parts: Vec<String>) -> String {
    parts.into_iter().filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" ")
}
