// Nochistlán Marketplace - community listings for items, jobs and rentals
// Copyright (C) 2025 Marketplace Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Query builder for the hosted backend's REST interface
//!
//! Queries are plain values: the HTTP client renders them to PostgREST query
//! parameters and the in-memory backend evaluates them against JSON rows.

use serde_json::Value;

/// A row predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq(String, Value),
    /// Case-insensitive LIKE; `%` and `_` are wildcards, `\` escapes
    ILike(String, String),
    /// Any of the nested filters
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    /// Case-insensitive "contains" match on a column
    pub fn contains(column: &str, term: &str) -> Self {
        Filter::ILike(column.to_string(), contains_pattern(term))
    }

    fn render_operator(&self) -> String {
        match self {
            Filter::Eq(_, value) => format!("eq.{}", value_literal(value)),
            Filter::ILike(_, pattern) => format!("ilike.{}", pattern),
            Filter::Or(filters) => format!("({})", render_group(filters)),
        }
    }

    /// `column=operator` pair for a top-level filter
    fn to_param(&self) -> (String, String) {
        match self {
            Filter::Eq(column, _) | Filter::ILike(column, _) => (column.clone(), self.render_operator()),
            Filter::Or(_) => ("or".to_string(), self.render_operator()),
        }
    }

    /// `column.operator` form used inside `or=(...)`
    fn render_nested(&self) -> String {
        match self {
            Filter::Eq(column, value) => {
                format!("{}.eq.{}", column, quote_reserved(&value_literal(value)))
            }
            Filter::ILike(column, pattern) => format!("{}.ilike.{}", column, quote_reserved(pattern)),
            Filter::Or(filters) => format!("or({})", render_group(filters)),
        }
    }
}

fn render_group(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(Filter::render_nested)
        .collect::<Vec<_>>()
        .join(",")
}

/// Sort order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A read, update or delete against one table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    /// PostgREST select clause, e.g. `*, profiles(*)`
    pub select: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<u32>,
}

impl Query {
    pub fn from(table: &str) -> Self {
        Self {
            table: table.to_string(),
            select: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.select = columns.to_string();
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn ilike(mut self, column: &str, pattern: &str) -> Self {
        self.filters.push(Filter::ILike(column.to_string(), pattern.to_string()));
        self
    }

    pub fn or(mut self, filters: Vec<Filter>) -> Self {
        self.filters.push(Filter::Or(filters));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Embedded resources named in the select clause (`profiles(*)` -> `profiles`)
    pub fn embedded(&self) -> Vec<&str> {
        self.select
            .split(',')
            .filter_map(|part| {
                let part = part.trim();
                part.find('(').map(|idx| part[..idx].trim())
            })
            .collect()
    }

    /// Query string parameters in PostgREST syntax; the HTTP layer encodes them
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), compact_select(&self.select))];

        params.extend(self.filters.iter().map(Filter::to_param));

        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }

        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        params
    }

    /// Filter-only parameters, used by update and delete
    pub fn filter_params(&self) -> Vec<(String, String)> {
        self.filters.iter().map(Filter::to_param).collect()
    }
}

fn compact_select(select: &str) -> String {
    select.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Render a JSON value the way PostgREST expects it after an operator
fn value_literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Double-quote values that would break an `or=(...)` group
fn quote_reserved(value: &str) -> String {
    if value.contains([',', '(', ')', ':', '"', '.']) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// `%term%` with LIKE wildcards in the term escaped
pub fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Case-insensitive LIKE match, as the backend evaluates `ilike`
pub fn ilike_matches(pattern: &str, text: &str) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Token {
        Any,
        One,
        Lit(char),
    }

    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    tokens.extend(escaped.to_lowercase().map(Token::Lit));
                }
            }
            '%' => {
                if tokens.last() != Some(&Token::Any) {
                    tokens.push(Token::Any);
                }
            }
            '_' => tokens.push(Token::One),
            other => tokens.extend(other.to_lowercase().map(Token::Lit)),
        }
    }

    let text: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();

    // matched[j]: tokens[..i] can match text[..j]
    let mut matched = vec![false; text.len() + 1];
    matched[0] = true;
    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            Token::Any => {
                let mut reachable = false;
                for j in 0..=text.len() {
                    reachable |= matched[j];
                    next[j] = reachable;
                }
            }
            Token::One => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1];
                }
            }
            Token::Lit(c) => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1] && text[j - 1] == *c;
                }
            }
        }
        matched = next;
    }

    matched[text.len()]
}
