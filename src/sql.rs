// Copyright 2026 SkyVision Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Renders a [`QueryPlan`] into SQLite SQL with bound parameters.
//!
//! Only identifiers from the closed enums below are ever spliced into the
//! statement text. Every request-derived value is a `?` parameter.

use rusqlite::types::Value as SqlValue;

use crate::plan::Attribute;
use crate::plan::DistanceFn;
use crate::plan::EntityKind;
use crate::plan::FilterSpec;
use crate::plan::QueryPlan;
use crate::plan::SortKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlTable {
    Airport,
    Airline,
}

impl SqlTable {
    pub fn for_entity(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Airport => SqlTable::Airport,
            EntityKind::Airline => SqlTable::Airline,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SqlTable::Airport => "airport",
            SqlTable::Airline => "airline",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlColumn {
    Id,
    Name,
    City,
    Country,
    Iata,
    Icao,
    ImageUrl,
    LogoUrl,
    Metadata,
    Embedding,
}

impl SqlColumn {
    pub fn sql(self) -> &'static str {
        match self {
            SqlColumn::Id => "id",
            SqlColumn::Name => "name",
            SqlColumn::City => "city",
            SqlColumn::Country => "country",
            SqlColumn::Iata => "iata",
            SqlColumn::Icao => "icao",
            SqlColumn::ImageUrl => "image_url",
            SqlColumn::LogoUrl => "logo_url",
            SqlColumn::Metadata => "metadata",
            SqlColumn::Embedding => "embedding",
        }
    }
}

#[derive(Clone, Debug)]
pub enum SqlExpr {
    Column(SqlColumn),
    JsonExtract { column: SqlColumn, key: &'static str },
    Lower(Box<SqlExpr>),
    Distance { function: DistanceFn, column: SqlColumn },
    Raw(&'static str),
    Alias(&'static str),
}

impl SqlExpr {
    pub fn column(column: SqlColumn) -> Self {
        Self::Column(column)
    }

    pub fn json_extract(column: SqlColumn, key: &'static str) -> Self {
        Self::JsonExtract { column, key }
    }

    pub fn lower(inner: SqlExpr) -> Self {
        Self::Lower(Box::new(inner))
    }

    pub fn raw(sql: &'static str) -> Self {
        Self::Raw(sql)
    }

    pub fn alias(alias: &'static str) -> Self {
        Self::Alias(alias)
    }

    pub fn to_sql(&self) -> String {
        match self {
            SqlExpr::Column(column) => column.sql().to_string(),
            SqlExpr::JsonExtract { column, key } => {
                format!("json_extract({}, '$.{}')", column.sql(), key)
            }
            SqlExpr::Lower(inner) => format!("LOWER({})", inner.to_sql()),
            SqlExpr::Distance { function, column } => {
                format!("{}({}, ?)", function.sql_name(), column.sql())
            }
            SqlExpr::Raw(sql) => (*sql).to_string(),
            SqlExpr::Alias(alias) => (*alias).to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SqlSelectItem {
    expr: SqlExpr,
    alias: Option<&'static str>,
    params: Vec<SqlValue>,
}

impl SqlSelectItem {
    pub fn new(expr: SqlExpr) -> Self {
        Self {
            expr,
            alias: None,
            params: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: &'static str) -> Self {
        self.alias = Some(alias);
        self
    }

    pub fn bind(mut self, value: SqlValue) -> Self {
        self.params.push(value);
        self
    }

    fn to_sql(&self) -> String {
        let expr = self.expr.to_sql();
        if let Some(alias) = self.alias {
            format!("{} AS {}", expr, alias)
        } else {
            expr
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlOrderDir {
    Asc,
}

impl SqlOrderDir {
    fn as_str(self) -> &'static str {
        match self {
            SqlOrderDir::Asc => "ASC",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SqlOrderBy {
    expr: SqlExpr,
    dir: SqlOrderDir,
}

impl SqlOrderBy {
    pub fn new(expr: SqlExpr, dir: SqlOrderDir) -> Self {
        Self { expr, dir }
    }

    pub fn asc(expr: SqlExpr) -> Self {
        Self::new(expr, SqlOrderDir::Asc)
    }

    fn to_sql(&self) -> String {
        format!("{} {}", self.expr.to_sql(), self.dir.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlFragment {
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn cmp(expr: SqlExpr, op: &str, value: SqlExpr, param: SqlValue) -> Self {
        let sql = format!("{} {} {}", expr.to_sql(), op, value.to_sql());
        Self {
            sql,
            params: vec![param],
        }
    }

    pub fn and(self, other: SqlFragment) -> SqlFragment {
        let sql = format!("({}) AND ({})", self.sql, other.sql);
        let mut params = self.params;
        params.extend(other.params);
        SqlFragment { sql, params }
    }

    pub fn or(self, other: SqlFragment) -> SqlFragment {
        let sql = format!("{} OR {}", self.sql, other.sql);
        let mut params = self.params;
        params.extend(other.params);
        SqlFragment { sql, params }
    }

    pub fn group(self) -> SqlFragment {
        SqlFragment {
            sql: format!("({})", self.sql),
            params: self.params,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SqlSelectBuilder {
    select: Vec<SqlSelectItem>,
    from: SqlTable,
    where_clause: Option<SqlFragment>,
    order_by: Vec<SqlOrderBy>,
    limit: Option<usize>,
}

impl SqlSelectBuilder {
    pub fn new(from: SqlTable) -> Self {
        Self {
            select: Vec::new(),
            from,
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn select<I>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = SqlSelectItem>,
    {
        self.select.extend(items);
        self
    }

    pub fn where_clause(mut self, clause: SqlFragment) -> Self {
        self.where_clause = Some(clause);
        self
    }

    pub fn order_by(mut self, order: SqlOrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(self) -> (String, Vec<SqlValue>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        sql.push_str("SELECT ");
        if self.select.is_empty() {
            sql.push('*');
        } else {
            let mut first = true;
            for item in self.select {
                if !first {
                    sql.push_str(", ");
                }
                first = false;
                sql.push_str(&item.to_sql());
                params.extend(item.params);
            }
        }
        sql.push_str(" FROM ");
        sql.push_str(self.from.as_str());

        if let Some(where_clause) = self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.sql);
            params.extend(where_clause.params);
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let mut first = true;
            for order in &self.order_by {
                if !first {
                    sql.push_str(", ");
                }
                first = false;
                sql.push_str(&order.to_sql());
            }
        }
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::from(limit as i64));
        }

        (sql, params)
    }
}

fn attribute_column(attribute: Attribute) -> SqlExpr {
    match attribute {
        Attribute::Country => SqlExpr::column(SqlColumn::Country),
        Attribute::City => SqlExpr::column(SqlColumn::City),
        Attribute::Style => SqlExpr::json_extract(SqlColumn::Metadata, "style"),
        Attribute::ImageUrl => SqlExpr::column(SqlColumn::ImageUrl),
        Attribute::LogoUrl => SqlExpr::column(SqlColumn::LogoUrl),
    }
}

/// Substring pattern with `\`, `%` and `_` escaped so the token matches literally.
fn like_pattern(token: &str) -> SqlValue {
    let mut pattern = String::with_capacity(token.len() + 2);
    pattern.push('%');
    for ch in token.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    SqlValue::from(pattern)
}

fn contains_ci(expr: SqlExpr, token: &str) -> SqlFragment {
    SqlFragment::cmp(
        SqlExpr::lower(expr),
        "LIKE",
        SqlExpr::raw("LOWER(?) ESCAPE '\\'"),
        like_pattern(token),
    )
}

fn any_of(parts: Vec<SqlFragment>) -> Option<SqlFragment> {
    parts
        .into_iter()
        .reduce(|acc, next| acc.or(next))
        .map(SqlFragment::group)
}

fn filter_to_sql(filter: &FilterSpec) -> Option<SqlFragment> {
    match filter {
        FilterSpec::ExactMatch { attribute, value } => Some(SqlFragment::cmp(
            SqlExpr::lower(attribute_column(*attribute)),
            "=",
            SqlExpr::lower(SqlExpr::raw("?")),
            SqlValue::from(value.clone()),
        )),
        FilterSpec::Exists { attribute } => {
            let col = attribute_column(*attribute).to_sql();
            Some(SqlFragment::raw(format!(
                "({col} IS NOT NULL AND {col} <> '')"
            )))
        }
        FilterSpec::Keyword { keywords } => any_of(
            keywords
                .iter()
                .map(|kw| {
                    let style =
                        contains_ci(SqlExpr::json_extract(SqlColumn::Metadata, "style"), kw);
                    let tags = contains_ci(SqlExpr::json_extract(SqlColumn::Metadata, "tags"), kw);
                    style.or(tags).group()
                })
                .collect(),
        ),
        FilterSpec::Region { countries } => any_of(
            countries
                .iter()
                .map(|country| contains_ci(SqlExpr::column(SqlColumn::Country), country))
                .collect(),
        ),
    }
}

/// Renders the plan as a single SELECT. Parameters are ordered as their
/// placeholders appear: distance vector, filters, then the limit.
pub fn render_plan(plan: &QueryPlan) -> (String, Vec<SqlValue>) {
    let target = plan.target();
    let media = target.media();
    let (city, iata, icao) = match target {
        EntityKind::Airport => (
            SqlExpr::column(SqlColumn::City),
            SqlExpr::raw("NULL"),
            SqlExpr::raw("NULL"),
        ),
        EntityKind::Airline => (
            SqlExpr::raw("NULL"),
            SqlExpr::column(SqlColumn::Iata),
            SqlExpr::column(SqlColumn::Icao),
        ),
    };

    let distance = match plan.distance() {
        Some(expr) => SqlSelectItem::new(SqlExpr::Distance {
            function: expr.function,
            column: SqlColumn::Embedding,
        })
        .bind(SqlValue::from(expr.vector.clone())),
        None => SqlSelectItem::new(SqlExpr::raw("0.0")),
    }
    .alias("distance");

    let mut builder = SqlSelectBuilder::new(SqlTable::for_entity(target)).select([
        SqlSelectItem::new(SqlExpr::column(SqlColumn::Id)),
        SqlSelectItem::new(SqlExpr::column(SqlColumn::Name)),
        SqlSelectItem::new(city).alias("city"),
        SqlSelectItem::new(SqlExpr::column(SqlColumn::Country)),
        SqlSelectItem::new(iata).alias("iata"),
        SqlSelectItem::new(icao).alias("icao"),
        SqlSelectItem::new(attribute_column(media)).alias("media_url"),
        SqlSelectItem::new(SqlExpr::column(SqlColumn::Metadata)),
        distance,
    ]);

    let clause = plan
        .filters()
        .iter()
        .filter_map(filter_to_sql)
        .reduce(|acc, next| acc.and(next));
    if let Some(clause) = clause {
        builder = builder.where_clause(clause);
    }

    for key in plan.order() {
        let order = match key {
            SortKey::MediaPresent => SqlOrderBy::asc(SqlExpr::raw(match media {
                Attribute::LogoUrl => "(logo_url IS NULL OR logo_url = '')",
                _ => "(image_url IS NULL OR image_url = '')",
            })),
            SortKey::NameAsc => SqlOrderBy::asc(SqlExpr::column(SqlColumn::Name)),
            // NULL distances sort after every defined one, or LIMIT could drop real matches.
            SortKey::DistanceAsc => {
                builder = builder.order_by(SqlOrderBy::asc(SqlExpr::raw("distance IS NULL")));
                SqlOrderBy::asc(SqlExpr::alias("distance"))
            }
            SortKey::IdAsc => SqlOrderBy::asc(SqlExpr::column(SqlColumn::Id)),
        };
        builder = builder.order_by(order);
    }

    builder.limit(plan.limit()).build()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::analyze::AnalyzedQuery;
    use crate::analyze::QueryAnalyzer;
    use crate::plan::QueryPlanner;
    use crate::plan::SearchFilters;

    fn render(
        kind: EntityKind,
        analyzed: &AnalyzedQuery,
        filters: serde_json::Value,
    ) -> (String, Vec<SqlValue>) {
        let filters = SearchFilters::from_json(&filters).expect("filters");
        let plan = QueryPlanner::new(DistanceFn::Cosine, 1000)
            .plan(kind, analyzed, &filters, Some(&[0.5, 1.0][..]), 12)
            .expect("plan");
        render_plan(&plan)
    }

    fn placeholders(sql: &str) -> usize {
        sql.matches('?').count()
    }

    #[test]
    fn vector_plan_with_keywords() {
        let analyzed = QueryAnalyzer::default().analyze("bamboo and glass");
        let (sql, params) = render(EntityKind::Airport, &analyzed, json!({}));
        insta::assert_snapshot!(sql, @r"
        SELECT id, name, city AS city, country, NULL AS iata, NULL AS icao, image_url AS media_url, metadata, vec_distance_cosine(embedding, ?) AS distance FROM airport WHERE ((LOWER(json_extract(metadata, '$.style')) LIKE LOWER(?) ESCAPE '\' OR LOWER(json_extract(metadata, '$.tags')) LIKE LOWER(?) ESCAPE '\') OR (LOWER(json_extract(metadata, '$.style')) LIKE LOWER(?) ESCAPE '\' OR LOWER(json_extract(metadata, '$.tags')) LIKE LOWER(?) ESCAPE '\')) ORDER BY (image_url IS NULL OR image_url = '') ASC, distance IS NULL ASC, distance ASC, id ASC LIMIT ?
        ");
        assert_eq!(params.len(), placeholders(&sql));
        assert_eq!(params[0], SqlValue::from("[0.5,1.0]".to_string()));
        assert_eq!(params[1], SqlValue::from("%bamboo%".to_string()));
        assert_eq!(params[3], SqlValue::from("%glass%".to_string()));
        assert_eq!(params[5], SqlValue::from(1000i64));
    }

    #[test]
    fn region_plan_has_no_vector_parameter() {
        let analyzed = QueryAnalyzer::default().analyze("airports in oceania");
        let (sql, params) = render(EntityKind::Airport, &analyzed, json!({}));
        assert!(sql.contains("0.0 AS distance"));
        assert!(!sql.contains("vec_distance"));
        assert!(sql.contains(
            "WHERE (LOWER(country) LIKE LOWER(?) ESCAPE '\\' OR LOWER(country) LIKE LOWER(?) ESCAPE '\\')"
        ));
        assert!(sql.ends_with(
            "ORDER BY (image_url IS NULL OR image_url = '') ASC, name ASC, id ASC LIMIT ?"
        ));
        assert_eq!(
            params,
            vec![
                SqlValue::from("%australia%".to_string()),
                SqlValue::from("%new zealand%".to_string()),
                SqlValue::from(1000i64),
            ]
        );
    }

    #[test]
    fn attribute_groups_are_anded() {
        let analyzed = QueryAnalyzer::default().analyze("terminals");
        let (sql, params) = render(
            EntityKind::Airport,
            &analyzed,
            json!({"has_image": true, "country": "India"}),
        );
        assert!(sql.contains(
            "WHERE (LOWER(country) = LOWER(?)) AND ((image_url IS NOT NULL AND image_url <> ''))"
        ));
        assert_eq!(params.len(), placeholders(&sql));
        assert_eq!(params[1], SqlValue::from("India".to_string()));
    }

    #[test]
    fn no_filters_means_no_where() {
        let (sql, params) = render(EntityKind::Airport, &AnalyzedQuery::empty(), json!({}));
        assert!(!sql.contains("WHERE"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn airline_plan_uses_logo_and_codes() {
        let (sql, _) = render(
            EntityKind::Airline,
            &AnalyzedQuery::empty(),
            json!({"has_logo": true}),
        );
        assert!(sql.contains("FROM airline"));
        assert!(sql.contains("NULL AS city"));
        assert!(sql.contains("iata AS iata, icao AS icao, logo_url AS media_url"));
        assert!(sql.contains("WHERE (logo_url IS NOT NULL AND logo_url <> '')"));
        assert!(sql.contains(
            "ORDER BY (logo_url IS NULL OR logo_url = '') ASC, distance IS NULL ASC, distance ASC"
        ));
    }

    #[test]
    fn filter_values_never_reach_sql_text() {
        let hostile = "x'); DROP TABLE airport; --";
        let analyzed = QueryAnalyzer::default().analyze(hostile);
        let (sql, params) = render(
            EntityKind::Airport,
            &analyzed,
            json!({"country": hostile, "city": hostile, "style": hostile}),
        );
        assert!(!sql.contains("DROP"));
        assert!(params.contains(&SqlValue::from(hostile.to_string())));
    }

    #[test]
    fn like_wildcards_in_tokens_match_literally() {
        assert_eq!(like_pattern("a_b"), SqlValue::from(r"%a\_b%".to_string()));
        assert_eq!(like_pattern("50%"), SqlValue::from(r"%50\%%".to_string()));
        assert_eq!(like_pattern(r"a\b"), SqlValue::from(r"%a\\b%".to_string()));

        let fragment = filter_to_sql(&FilterSpec::Region {
            countries: vec!["cote_d'ivoire".into()],
        })
        .expect("region fragment");
        assert_eq!(fragment.sql, "(LOWER(country) LIKE LOWER(?) ESCAPE '\\')");
        assert_eq!(
            fragment.params,
            vec![SqlValue::from(r"%cote\_d'ivoire%".to_string())]
        );
    }
}
