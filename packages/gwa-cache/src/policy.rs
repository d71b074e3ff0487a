//! Which records the cache may purge
//!
//! Geometry/position tables (nodes) are partly generated by the native
//! application itself. Records in those tables whose identity is native
//! (no application id, or one carrying the native prefix) are foreign: the
//! cache tracks them but never expires or purges them.

use crate::gwa::keyword_base;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keyword base names (version suffix stripped) of position tables
    pub foreign_keywords: Vec<String>,
    /// Application-id prefix of natively generated identities
    pub native_id_prefix: String,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            foreign_keywords: vec!["NODE".to_string()],
            native_id_prefix: "gsa".to_string(),
        }
    }
}

impl RetentionPolicy {
    /// Every record alterable
    pub fn owns_everything() -> Self {
        Self {
            foreign_keywords: Vec::new(),
            native_id_prefix: String::new(),
        }
    }

    pub fn is_alterable(&self, keyword: &str, application_id: Option<&str>) -> bool {
        !self.is_foreign(keyword, application_id)
    }

    pub fn is_foreign(&self, keyword: &str, application_id: Option<&str>) -> bool {
        let base = keyword_base(keyword);
        if !self
            .foreign_keywords
            .iter()
            .any(|k| k.eq_ignore_ascii_case(base))
        {
            return false;
        }
        match application_id {
            None => true,
            Some(id) if id.is_empty() => true,
            Some(id) => {
                !self.native_id_prefix.is_empty()
                    && id
                        .get(..self.native_id_prefix.len())
                        .is_some_and(|p| p.eq_ignore_ascii_case(&self.native_id_prefix))
            }
        }
    }
}
