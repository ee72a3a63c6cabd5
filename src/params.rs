use serde_json::Value;

/// Query against one class.
///
/// Constraints are taken as ready-made `where` JSON.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub constraints: Option<Value>,
    pub limit: Option<u32>,
    pub skip: Option<u32>,
    /// Keys to sort by; prefix with `-` for descending order.
    pub order: Vec<String>,
    /// Restricts the returned keys.
    pub keys: Vec<String>,
    /// Pointer keys to expand.
    pub include: Vec<String>,
}

impl Query {
    /// Matches every object of the class.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches objects satisfying `constraints`, e.g. `{"score": {"$gt": 100}}`.
    pub fn matching(constraints: Value) -> Self {
        Self {
            constraints: Some(constraints),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u32) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn order<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.order = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn include<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.include = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Encodes the query as URL parameters for `GET /classes/<name>`.
    pub(crate) fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(constraints) = &self.constraints {
            params.push(("where".to_owned(), constraints.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_owned(), limit.to_string()));
        }
        if let Some(skip) = self.skip {
            params.push(("skip".to_owned(), skip.to_string()));
        }
        for (name, keys) in [
            ("order", &self.order),
            ("keys", &self.keys),
            ("include", &self.include),
        ] {
            if !keys.is_empty() {
                params.push((name.to_owned(), keys.join(",")));
            }
        }
        params
    }

    /// Parameters for a count: no results, just the total.
    pub(crate) fn to_count_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<_> = self
            .to_params()
            .into_iter()
            .filter(|(name, _)| !matches!(name.as_str(), "limit" | "skip" | "order" | "keys"))
            .collect();
        params.push(("limit".to_owned(), "0".to_owned()));
        params.push(("count".to_owned(), "1".to_owned()));
        params
    }
}
