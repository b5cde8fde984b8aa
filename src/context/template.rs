//! Prompt templates with `{key}` placeholders.
//!
//! `{{` and `}}` produce literal braces. Placeholder names are context keys made of
//! alphanumerics, `_`, `-` and `.`.

use crate::error::ContextError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Brace(char),
    Placeholder(&'a str),
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>, String> {
    let mut segments = Vec::new();
    let bytes = template.as_bytes();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                segments.push(Segment::Literal(&template[literal_start..i]));
                segments.push(Segment::Brace('{'));
                i += 2;
                literal_start = i;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                segments.push(Segment::Literal(&template[literal_start..i]));
                segments.push(Segment::Brace('}'));
                i += 2;
                literal_start = i;
            }
            b'{' => {
                let close = template[i + 1..]
                    .find('}')
                    .map(|offset| i + 1 + offset)
                    .ok_or_else(|| format!("unclosed '{{' at byte {}", i))?;
                let name = &template[i + 1..close];
                if name.is_empty() {
                    return Err(format!("empty placeholder at byte {}", i));
                }
                if !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
                {
                    return Err(format!("invalid placeholder name '{}'", name));
                }
                segments.push(Segment::Literal(&template[literal_start..i]));
                segments.push(Segment::Placeholder(name));
                i = close + 1;
                literal_start = i;
            }
            b'}' => return Err(format!("unmatched '}}' at byte {}", i)),
            _ => i += 1,
        }
    }
    segments.push(Segment::Literal(&template[literal_start..]));
    Ok(segments)
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholders(template: &str) -> Result<Vec<String>, String> {
    let mut names: Vec<String> = Vec::new();
    for segment in parse(template)? {
        if let Segment::Placeholder(name) = segment {
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Render `template`, asking `lookup` for each placeholder's text.
pub fn render<F>(template: &str, mut lookup: F) -> Result<String, ContextError>
where
    F: FnMut(&str) -> Result<String, ContextError>,
{
    let segments = parse(template).map_err(ContextError::MalformedTemplate)?;
    let mut rendered = String::with_capacity(template.len());
    for segment in segments {
        match segment {
            Segment::Literal(text) => rendered.push_str(text),
            Segment::Brace(brace) => rendered.push(brace),
            Segment::Placeholder(name) => rendered.push_str(&lookup(name)?),
        }
    }
    Ok(rendered)
}
