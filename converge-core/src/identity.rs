//! Resource identity: `{{param}}` URL templates.

use std::fmt::Display;

use crate::{error::ValidationError, value::Node};

/// A path template such as
/// `projects/{{project}}/locations/{{location}}/features/{{feature}}`.
///
/// Every placeholder names a string field of the resource. Two resources
/// rendering to the same key are the same remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityTemplate(&'static str);

enum Piece<'a> {
    Literal(&'a str),
    Param(&'a str),
}

impl IdentityTemplate {
    pub const fn new(template: &'static str) -> Self {
        IdentityTemplate(template)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// Placeholder names, in template order.
    pub fn params(&self) -> Vec<&'static str> {
        pieces(self.0)
            .into_iter()
            .filter_map(|p| match p {
                Piece::Param(name) => Some(name),
                Piece::Literal(_) => None,
            })
            .collect()
    }

    /// Substitute the node's identity fields. Values are normalized with
    /// [`normalize`], so a self link and a short name render identically.
    pub fn render(&self, node: &Node) -> Result<String, ValidationError> {
        let mut out = String::with_capacity(self.0.len());
        for piece in pieces(self.0) {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Param(name) => {
                    let value = node.get_str(name).map(normalize).unwrap_or_default();
                    if value.is_empty() {
                        return Err(ValidationError::MissingIdentity {
                            field: name,
                            template: self.0,
                        });
                    }
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// The inverse of [`IdentityTemplate::render`]: recover the parameter
    /// values from a key. Returns `None` when the key does not match.
    pub fn extract(&self, key: &str) -> Option<Vec<(&'static str, String)>> {
        let mut rest = key;
        let mut values = Vec::new();
        let pieces = pieces(self.0);
        for (i, piece) in pieces.iter().enumerate() {
            match piece {
                Piece::Literal(text) => rest = rest.strip_prefix(text)?,
                Piece::Param(name) => {
                    let end = match pieces.get(i + 1) {
                        Some(Piece::Literal(next)) => rest.find(next)?,
                        _ => rest.len(),
                    };
                    let value = &rest[..end];
                    if value.is_empty() || value.contains('/') {
                        return None;
                    }
                    values.push((*name, value.to_string()));
                    rest = &rest[end..];
                }
            }
        }
        rest.is_empty().then_some(values)
    }
}

impl Display for IdentityTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn pieces(template: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        if start > 0 {
            out.push(Piece::Literal(&rest[..start]));
        }
        out.push(Piece::Param(&rest[start + 2..start + 2 + len]));
        rest = &rest[start + 2 + len + 2..];
    }
    if !rest.is_empty() {
        out.push(Piece::Literal(rest));
    }
    out
}

/// Reduce a reference to its last path segment:
/// `projects/p/locations/us-central1` becomes `us-central1`.
pub fn normalize(value: &str) -> &str {
    let trimmed = value.trim().trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMBERSHIP: IdentityTemplate = IdentityTemplate::new(
        "projects/{{project}}/locations/{{location}}/features/{{feature}}/memberships/{{membership}}",
    );

    fn node() -> Node {
        Node::new()
            .with("project", "my-project")
            .with("location", "projects/my-project/locations/global")
            .with("feature", "configmanagement")
            .with("membership", "m1")
    }

    #[test]
    fn render_substitutes_normalized_values() {
        assert_eq!(
            MEMBERSHIP.render(&node()).unwrap(),
            "projects/my-project/locations/global/features/configmanagement/memberships/m1"
        );
    }

    #[test]
    fn render_names_missing_field() {
        let mut n = node();
        n.remove("feature");
        assert_eq!(
            MEMBERSHIP.render(&n).unwrap_err(),
            ValidationError::MissingIdentity {
                field: "feature",
                template: MEMBERSHIP.as_str(),
            }
        );
        let n = node().with("membership", "  ");
        assert!(MEMBERSHIP.render(&n).is_err());
    }

    #[test]
    fn same_identity_same_key() {
        let a = node().with("membershipLocation", "us-east1");
        let b = node()
            .with("project", "projects/my-project")
            .with("location", "global");
        assert_eq!(MEMBERSHIP.render(&a).unwrap(), MEMBERSHIP.render(&b).unwrap());
    }

    #[test]
    fn extract_inverts_render() {
        let key = MEMBERSHIP.render(&node()).unwrap();
        let values = MEMBERSHIP.extract(&key).unwrap();
        assert_eq!(
            values,
            vec![
                ("project", "my-project".to_string()),
                ("location", "global".to_string()),
                ("feature", "configmanagement".to_string()),
                ("membership", "m1".to_string()),
            ]
        );
        assert_eq!(MEMBERSHIP.extract("projects/p/locations/l"), None);
        assert_eq!(
            MEMBERSHIP.extract("projects/p/locations/l/features/f/memberships/a/b"),
            None
        );
    }

    #[test]
    fn params_in_order() {
        assert_eq!(
            MEMBERSHIP.params(),
            vec!["project", "location", "feature", "membership"]
        );
    }
}
