//! Field-level security and masking.
//!
//! Roles carry two kinds of field rules per index permission:
//! - FLS rules: an allow-list (`title`, `meta.*`) or a deny-list (`~secret`)
//!   of field patterns
//! - masked fields: `field`, `field::ALGO` or
//!   `field::/regex/::replacement[::/regex/::replacement...]`
//!
//! [`FieldFilter`] applies the combined rules of every contributing role to
//! result documents.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha512};

use super::error::{SecurityError, SecurityResult};
use super::pattern::Pattern;

const DENY_PREFIX: char = '~';
const MASK_SEPARATOR: &str = "::";
const BLAKE3_CONTEXT: &str = "warden 2024-01 field masking";

/// Whether FLS patterns list visible or hidden fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRuleMode {
    /// Only listed fields are visible.
    Allow,
    /// Listed fields are hidden.
    Deny,
}

/// One role's FLS rules for one index permission.
#[derive(Debug, Clone)]
pub struct FieldRules {
    mode: FieldRuleMode,
    patterns: Vec<Pattern>,
}

impl FieldRules {
    /// Parse FLS entries. Entries must be all allow or all deny.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> SecurityResult<Option<Self>> {
        let entries: Vec<&str> = entries
            .iter()
            .map(|e| e.as_ref().trim())
            .filter(|e| !e.is_empty())
            .collect();
        if entries.is_empty() {
            return Ok(None);
        }

        let denies = entries.iter().filter(|e| e.starts_with(DENY_PREFIX)).count();
        let mode = match denies {
            0 => FieldRuleMode::Allow,
            n if n == entries.len() => FieldRuleMode::Deny,
            _ => {
                return Err(SecurityError::InvalidPattern {
                    pattern: entries.join(","),
                    reason: "FLS entries mix allowed and denied fields".to_string(),
                })
            }
        };

        let patterns = entries
            .iter()
            .map(|e| Pattern::parse(e.trim_start_matches(DENY_PREFIX)))
            .collect::<SecurityResult<Vec<_>>>()?;
        Ok(Some(Self { mode, patterns }))
    }

    /// The rule mode.
    pub fn mode(&self) -> FieldRuleMode {
        self.mode
    }

    /// Whether a dotted field path is visible under these rules.
    ///
    /// A rule on an object path covers every field below it.
    pub fn is_visible(&self, path: &str) -> bool {
        let listed = path_and_ancestors(path).any(|p| self.patterns.iter().any(|pat| pat.matches(p)));
        match self.mode {
            FieldRuleMode::Allow => listed,
            FieldRuleMode::Deny => !listed,
        }
    }
}

/// `a.b.c`, `a.b`, `a`
fn path_and_ancestors(path: &str) -> impl Iterator<Item = &str> {
    let cuts = path
        .match_indices('.')
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    std::iter::once(path).chain(cuts.into_iter().rev().map(move |idx| &path[..idx]))
}

/// How a masked value is computed.
#[derive(Debug, Clone)]
pub enum MaskingFunction {
    /// Keyed BLAKE3 over the value; the default.
    Blake3,
    /// SHA-256 over salt and value.
    Sha256,
    /// SHA-512 over salt and value.
    Sha512,
    /// Ordered regex replacements. A value no rule changes is hashed with
    /// [`MaskingFunction::Blake3`] instead.
    Replace(Vec<(Regex, String)>),
}

impl MaskingFunction {
    /// Identifier used in logs and diagnostics.
    pub fn id(&self) -> &'static str {
        match self {
            MaskingFunction::Blake3 => "BLAKE3",
            MaskingFunction::Sha256 => "SHA-256",
            MaskingFunction::Sha512 => "SHA-512",
            MaskingFunction::Replace(_) => "REGEX",
        }
    }

    /// Mask a value. Same value and salt always give the same output, and the
    /// output is never the value itself.
    pub fn apply(&self, value: &str, salt: &[u8]) -> String {
        match self {
            MaskingFunction::Blake3 => {
                let key = blake3::derive_key(BLAKE3_CONTEXT, salt);
                blake3::keyed_hash(&key, value.as_bytes()).to_hex().to_string()
            }
            MaskingFunction::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(salt);
                hasher.update(value.as_bytes());
                hex::encode(hasher.finalize())
            }
            MaskingFunction::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(salt);
                hasher.update(value.as_bytes());
                hex::encode(hasher.finalize())
            }
            MaskingFunction::Replace(rules) => {
                let mut masked = value.to_string();
                for (regex, replacement) in rules {
                    masked = regex.replace_all(&masked, replacement.as_str()).into_owned();
                }
                if masked == value {
                    return MaskingFunction::Blake3.apply(value, salt);
                }
                masked
            }
        }
    }
}

/// A masked field pattern with its function.
#[derive(Debug, Clone)]
pub struct MaskedField {
    pattern: Pattern,
    function: MaskingFunction,
}

impl MaskedField {
    /// Parse a masked-field expression.
    pub fn parse(expr: &str) -> SecurityResult<Self> {
        let invalid = || SecurityError::InvalidMaskedField(expr.to_string());
        let mut parts = expr.split(MASK_SEPARATOR);
        let field = parts.next().map(str::trim).filter(|f| !f.is_empty()).ok_or_else(invalid)?;
        let rest: Vec<&str> = parts.collect();

        let function = match rest.as_slice() {
            [] => MaskingFunction::Blake3,
            [algo] => match algo.trim().to_ascii_uppercase().as_str() {
                "BLAKE3" => MaskingFunction::Blake3,
                "SHA-256" | "SHA256" => MaskingFunction::Sha256,
                "SHA-512" | "SHA512" => MaskingFunction::Sha512,
                _ => return Err(invalid()),
            },
            pairs if pairs.len() % 2 == 0 => {
                let mut rules = Vec::with_capacity(pairs.len() / 2);
                for pair in pairs.chunks(2) {
                    let source = pair[0]
                        .strip_prefix('/')
                        .and_then(|s| s.strip_suffix('/'))
                        .filter(|s| !s.is_empty())
                        .ok_or_else(invalid)?;
                    let regex = Regex::new(source).map_err(|_| invalid())?;
                    rules.push((regex, pair[1].to_string()));
                }
                MaskingFunction::Replace(rules)
            }
            _ => return Err(invalid()),
        };

        Ok(Self {
            pattern: Pattern::parse(field)?,
            function,
        })
    }

    /// Whether this entry masks the dotted field path.
    ///
    /// A pattern on an object path masks every leaf below it.
    pub fn matches(&self, path: &str) -> bool {
        path_and_ancestors(path).any(|p| self.pattern.matches(p))
    }

    /// Field pattern source.
    pub fn field(&self) -> &str {
        self.pattern.source()
    }

    /// The masking function.
    pub fn function(&self) -> &MaskingFunction {
        &self.function
    }
}

/// A masked field chosen for one index, tagged with the role that supplied it.
#[derive(Debug, Clone)]
pub struct MaskRule {
    /// Role that won the tie-break for this pattern.
    pub role: String,
    /// The rule itself.
    pub field: MaskedField,
}

/// Combined field visibility and masking for one index.
///
/// `visibility` holds one entry per contributing role; `None` marks a role
/// that sees every field. A field is hidden only when every role hides it.
#[derive(Debug, Clone, Default)]
pub struct FlsDirective {
    visibility: Vec<Option<FieldRules>>,
    masks: Vec<MaskRule>,
}

impl FlsDirective {
    /// Directive that neither hides nor masks.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Record one role's visibility rules.
    pub fn add_role_rules(&mut self, rules: Option<FieldRules>) {
        self.visibility.push(rules);
    }

    /// Record masks, sorted by role name so the smallest name wins per field.
    pub fn set_masks(&mut self, mut masks: Vec<MaskRule>) {
        masks.sort_by(|a, b| a.role.cmp(&b.role));
        self.masks = masks;
    }

    /// Whether any field could be hidden.
    pub fn hides_fields(&self) -> bool {
        !self.visibility.is_empty() && self.visibility.iter().all(Option::is_some)
    }

    /// Whether any field is masked.
    pub fn masks_fields(&self) -> bool {
        !self.masks.is_empty()
    }

    /// Whether the directive changes documents at all.
    pub fn is_restricted(&self) -> bool {
        self.hides_fields() || self.masks_fields()
    }

    /// Whether a dotted field path is visible.
    pub fn is_visible(&self, path: &str) -> bool {
        if !self.hides_fields() {
            return true;
        }
        self.visibility
            .iter()
            .flatten()
            .any(|rules| rules.is_visible(path))
    }

    /// The mask applying to a path, if any.
    pub fn mask_for(&self, path: &str) -> Option<&MaskRule> {
        self.masks.iter().find(|m| m.field.matches(path))
    }

    /// Masked field patterns and the role that owns each.
    pub fn masks(&self) -> &[MaskRule] {
        &self.masks
    }
}

/// Applies an [`FlsDirective`] to JSON documents.
pub struct FieldFilter<'a> {
    directive: &'a FlsDirective,
    salt: &'a [u8],
}

impl<'a> FieldFilter<'a> {
    /// Create a filter with the cluster masking salt.
    pub fn new(directive: &'a FlsDirective, salt: &'a [u8]) -> Self {
        Self { directive, salt }
    }

    /// Remove hidden fields and mask masked ones in place.
    pub fn apply(&self, document: &mut Value) {
        if !self.directive.is_restricted() {
            return;
        }
        if let Value::Object(map) = document {
            self.filter_object(map, "");
        }
    }

    fn filter_object(&self, map: &mut Map<String, Value>, prefix: &str) {
        let keys: Vec<String> = map.keys().cloned().collect();
        for key in keys {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            let keep = match map.get_mut(&key) {
                Some(value) => self.filter_value(value, &path),
                None => continue,
            };
            if !keep {
                map.remove(&key);
            }
        }
    }

    /// Returns whether the value survives at `path`.
    fn filter_value(&self, value: &mut Value, path: &str) -> bool {
        match value {
            Value::Object(map) if !map.is_empty() => {
                self.filter_object(map, path);
                !map.is_empty()
            }
            Value::Array(items) => {
                let had_items = !items.is_empty();
                items.retain_mut(|item| self.filter_value(item, path));
                !items.is_empty() || (!had_items && self.directive.is_visible(path))
            }
            _ => {
                if !self.directive.is_visible(path) {
                    return false;
                }
                if let Some(rule) = self.directive.mask_for(path) {
                    if let Some(text) = scalar_text(value) {
                        *value = Value::String(rule.field.function().apply(&text, self.salt));
                    }
                }
                true
            }
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Effective `role:FUNCTION` per masked field pattern, for diagnostics.
pub fn describe_masks(directive: &FlsDirective) -> BTreeMap<String, String> {
    let mut described = BTreeMap::new();
    for rule in directive.masks() {
        described
            .entry(rule.field.field().to_string())
            .or_insert_with(|| format!("{}:{}", rule.role, rule.field.function().id()));
    }
    described
}
