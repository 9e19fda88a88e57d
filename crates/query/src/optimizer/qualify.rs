//! Column qualification pass.
//!
//! Resolves every column reference against the scope of its operator and
//! rewrites it to the `(relation, name)` of the column it denotes. Unknown
//! tables, columns and common table expressions, as well as ambiguous names,
//! are reported here, before anything is planned.
//!
//! Inside an EXISTS subquery, names that do not resolve locally are looked up
//! in the enclosing query (correlation). Scalar subqueries see no outer scope.

use std::collections::BTreeMap;

use tern_storage::CatalogSnapshot;

use crate::ast::{AggregateExpr, ColumnRef, Expr, SortKey, WindowExpr, WindowFunc};
use crate::error::{QueryError, QueryResult};
use crate::optimizer::OptimizerPass;
use crate::planner::{CommonTableExpr, JoinKind, LogicalPlan};

/// Output columns of an operator, as `(relation, name)`.
type Scope = Vec<(Option<String>, String)>;

/// Qualifies column references against the catalog.
pub struct QualifyColumns<'a> {
    snapshot: &'a CatalogSnapshot,
}

impl<'a> QualifyColumns<'a> {
    /// Creates the pass.
    pub fn new(snapshot: &'a CatalogSnapshot) -> Self {
        Self { snapshot }
    }
}

impl OptimizerPass for QualifyColumns<'_> {
    fn optimize(&self, plan: LogicalPlan) -> QueryResult<LogicalPlan> {
        let mut qualifier = Qualifier {
            snapshot: self.snapshot,
            ctes: Vec::new(),
        };
        qualifier.plan(plan, &[]).map(|(plan, _)| plan)
    }

    fn name(&self) -> &'static str {
        "qualify_columns"
    }
}

struct Qualifier<'a> {
    snapshot: &'a CatalogSnapshot,
    /// Visible CTE scopes, innermost WITH last.
    ctes: Vec<BTreeMap<String, Scope>>,
}

fn resolve_in(scope: &Scope, column: &ColumnRef) -> QueryResult<Option<ColumnRef>> {
    let mut found: Option<&(Option<String>, String)> = None;
    for entry in scope {
        let name_matches = entry.1 == column.name;
        let relation_matches = match &column.relation {
            Some(r) => entry.0.as_deref() == Some(r.as_str()),
            None => true,
        };
        if name_matches && relation_matches {
            if found.is_some() {
                return Err(QueryError::ambiguous_column(&column.to_string()));
            }
            found = Some(entry);
        }
    }
    Ok(found.map(|(relation, name)| ColumnRef {
        relation: relation.clone(),
        name: name.clone(),
    }))
}

fn output_scope(exprs: &[Expr]) -> Scope {
    exprs.iter().map(|e| e.output_name()).collect()
}

impl Qualifier<'_> {
    fn resolve(&self, column: &ColumnRef, scope: &Scope, outer: &[&Scope]) -> QueryResult<ColumnRef> {
        if let Some(c) = resolve_in(scope, column)? {
            return Ok(c);
        }
        for outer_scope in outer {
            if let Some(c) = resolve_in(outer_scope, column)? {
                return Ok(c);
            }
        }
        Err(QueryError::unknown_column(&column.to_string()))
    }

    fn expr(&mut self, expr: Expr, scope: &Scope, outer: &[&Scope]) -> QueryResult<Expr> {
        let go = |e: Expr, this: &mut Self| this.expr(e, scope, outer);
        Ok(match expr {
            Expr::Column(c) => Expr::Column(self.resolve(&c, scope, outer)?),
            Expr::Literal(v) => Expr::Literal(v),
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(go(*left, self)?),
                right: Box::new(go(*right, self)?),
            },
            Expr::Unary { op, expr } => Expr::Unary {
                op,
                expr: Box::new(go(*expr, self)?),
            },
            Expr::Function { func, args } => Expr::Function {
                func,
                args: args
                    .into_iter()
                    .map(|a| go(a, self))
                    .collect::<QueryResult<_>>()?,
            },
            Expr::Case {
                branches,
                otherwise,
            } => {
                let mut out = Vec::with_capacity(branches.len());
                for (when, then) in branches {
                    out.push((go(when, self)?, go(then, self)?));
                }
                Expr::Case {
                    branches: out,
                    otherwise: match otherwise {
                        Some(e) => Some(Box::new(go(*e, self)?)),
                        None => None,
                    },
                }
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => Expr::InList {
                expr: Box::new(go(*expr, self)?),
                list: list
                    .into_iter()
                    .map(|e| go(e, self))
                    .collect::<QueryResult<_>>()?,
                negated,
            },
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Expr::Between {
                expr: Box::new(go(*expr, self)?),
                low: Box::new(go(*low, self)?),
                high: Box::new(go(*high, self)?),
                negated,
            },
            Expr::Exists { subquery, negated } => {
                let mut scopes: Vec<&Scope> = vec![scope];
                scopes.extend_from_slice(outer);
                let (subquery, _) = self.plan(*subquery, &scopes)?;
                Expr::Exists {
                    subquery: Box::new(subquery),
                    negated,
                }
            }
            Expr::ScalarSubquery(subquery) => {
                let (subquery, _) = self.plan(*subquery, &[])?;
                Expr::ScalarSubquery(Box::new(subquery))
            }
            Expr::Alias { expr, name } => Expr::Alias {
                expr: Box::new(go(*expr, self)?),
                name,
            },
        })
    }

    fn exprs(&mut self, exprs: Vec<Expr>, scope: &Scope, outer: &[&Scope]) -> QueryResult<Vec<Expr>> {
        exprs
            .into_iter()
            .map(|e| self.expr(e, scope, outer))
            .collect()
    }

    fn opt_expr(
        &mut self,
        expr: Option<Expr>,
        scope: &Scope,
        outer: &[&Scope],
    ) -> QueryResult<Option<Expr>> {
        expr.map(|e| self.expr(e, scope, outer)).transpose()
    }

    fn sort_keys(&mut self, keys: Vec<SortKey>, scope: &Scope, outer: &[&Scope]) -> QueryResult<Vec<SortKey>> {
        keys.into_iter()
            .map(|k| {
                Ok(SortKey {
                    expr: self.expr(k.expr, scope, outer)?,
                    order: k.order,
                })
            })
            .collect()
    }

    fn lookup_cte(&self, name: &str) -> Option<&Scope> {
        self.ctes.iter().rev().find_map(|frame| frame.get(name))
    }

    fn plan(&mut self, plan: LogicalPlan, outer: &[&Scope]) -> QueryResult<(LogicalPlan, Scope)> {
        match plan {
            LogicalPlan::Scan {
                table,
                alias,
                predicate,
            } => {
                let schema = self
                    .snapshot
                    .schema(&table)
                    .ok_or_else(|| QueryError::unknown_table(&table))?;
                let relation = alias.clone().unwrap_or_else(|| table.clone());
                let scope: Scope = schema
                    .columns()
                    .iter()
                    .map(|c| (Some(relation.clone()), c.name().to_string()))
                    .collect();
                let predicate = self.opt_expr(predicate, &scope, outer)?;
                Ok((
                    LogicalPlan::Scan {
                        table,
                        alias,
                        predicate,
                    },
                    scope,
                ))
            }
            LogicalPlan::CteRef { name, alias } => {
                let cte_scope = self
                    .lookup_cte(&name)
                    .ok_or_else(|| QueryError::unknown_table(&name))?;
                let relation = alias.clone().unwrap_or_else(|| name.clone());
                let scope = cte_scope
                    .iter()
                    .map(|(_, n)| (Some(relation.clone()), n.clone()))
                    .collect();
                Ok((LogicalPlan::CteRef { name, alias }, scope))
            }
            LogicalPlan::Filter { input, predicate } => {
                let (input, scope) = self.plan(*input, outer)?;
                let predicate = self.expr(predicate, &scope, outer)?;
                Ok((
                    LogicalPlan::Filter {
                        input: Box::new(input),
                        predicate,
                    },
                    scope,
                ))
            }
            LogicalPlan::Project { input, exprs } => {
                let (input, scope) = self.plan(*input, outer)?;
                let exprs = self.exprs(exprs, &scope, outer)?;
                let out = output_scope(&exprs);
                Ok((
                    LogicalPlan::Project {
                        input: Box::new(input),
                        exprs,
                    },
                    out,
                ))
            }
            LogicalPlan::Join {
                left,
                right,
                kind,
                condition,
            } => {
                let (left, left_scope) = self.plan(*left, outer)?;
                let (right, right_scope) = self.plan(*right, outer)?;
                let mut combined = left_scope.clone();
                combined.extend(right_scope);
                let condition = self.opt_expr(condition, &combined, outer)?;
                let out = match kind {
                    JoinKind::Semi | JoinKind::Anti => left_scope,
                    _ => combined,
                };
                Ok((
                    LogicalPlan::Join {
                        left: Box::new(left),
                        right: Box::new(right),
                        kind,
                        condition,
                    },
                    out,
                ))
            }
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
                having,
            } => {
                let (input, scope) = self.plan(*input, outer)?;
                let group_by = self.exprs(group_by, &scope, outer)?;
                let mut qualified = Vec::with_capacity(aggregates.len());
                for agg in aggregates {
                    qualified.push(AggregateExpr {
                        arg: self.opt_expr(agg.arg, &scope, outer)?,
                        filter: self.opt_expr(agg.filter, &scope, outer)?,
                        ..agg
                    });
                }
                let mut out = output_scope(&group_by);
                out.extend(qualified.iter().map(|a| (None, a.alias.clone())));
                let having = self.opt_expr(having, &out, outer)?;
                Ok((
                    LogicalPlan::Aggregate {
                        input: Box::new(input),
                        group_by,
                        aggregates: qualified,
                        having,
                    },
                    out,
                ))
            }
            LogicalPlan::Sort { input, keys } => {
                let (input, scope) = self.plan(*input, outer)?;
                let keys = self.sort_keys(keys, &scope, outer)?;
                Ok((
                    LogicalPlan::Sort {
                        input: Box::new(input),
                        keys,
                    },
                    scope,
                ))
            }
            LogicalPlan::Limit {
                input,
                count,
                offset,
            } => {
                let (input, scope) = self.plan(*input, outer)?;
                Ok((
                    LogicalPlan::Limit {
                        input: Box::new(input),
                        count,
                        offset,
                    },
                    scope,
                ))
            }
            LogicalPlan::Distinct { input } => {
                let (input, scope) = self.plan(*input, outer)?;
                Ok((
                    LogicalPlan::Distinct {
                        input: Box::new(input),
                    },
                    scope,
                ))
            }
            LogicalPlan::SetOp {
                left,
                right,
                kind,
                all,
            } => {
                let (left, left_scope) = self.plan(*left, outer)?;
                let (right, right_scope) = self.plan(*right, outer)?;
                if left_scope.len() != right_scope.len() {
                    return Err(QueryError::type_mismatch(format!(
                        "{} inputs have {} and {} columns",
                        kind.name(),
                        left_scope.len(),
                        right_scope.len()
                    )));
                }
                let out = left_scope.into_iter().map(|(_, n)| (None, n)).collect();
                Ok((
                    LogicalPlan::SetOp {
                        left: Box::new(left),
                        right: Box::new(right),
                        kind,
                        all,
                    },
                    out,
                ))
            }
            LogicalPlan::Window {
                input,
                partition_by,
                order_by,
                frame,
                functions,
            } => {
                let (input, scope) = self.plan(*input, outer)?;
                let partition_by = self.exprs(partition_by, &scope, outer)?;
                let order_by = self.sort_keys(order_by, &scope, outer)?;
                let mut qualified = Vec::with_capacity(functions.len());
                for f in functions {
                    let func = match f.func {
                        WindowFunc::Lag {
                            expr,
                            offset,
                            default,
                        } => WindowFunc::Lag {
                            expr: self.expr(expr, &scope, outer)?,
                            offset,
                            default,
                        },
                        WindowFunc::Lead {
                            expr,
                            offset,
                            default,
                        } => WindowFunc::Lead {
                            expr: self.expr(expr, &scope, outer)?,
                            offset,
                            default,
                        },
                        WindowFunc::Aggregate { func, arg } => WindowFunc::Aggregate {
                            func,
                            arg: self.opt_expr(arg, &scope, outer)?,
                        },
                        other => other,
                    };
                    qualified.push(WindowExpr::new(func, f.alias));
                }
                let mut out = scope;
                out.extend(qualified.iter().map(|f| (None, f.alias.clone())));
                Ok((
                    LogicalPlan::Window {
                        input: Box::new(input),
                        partition_by,
                        order_by,
                        frame,
                        functions: qualified,
                    },
                    out,
                ))
            }
            LogicalPlan::With { ctes, body } => {
                self.ctes.push(BTreeMap::new());
                let result = self.with(ctes, *body, outer);
                self.ctes.pop();
                result
            }
        }
    }

    fn with(
        &mut self,
        ctes: Vec<CommonTableExpr>,
        body: LogicalPlan,
        outer: &[&Scope],
    ) -> QueryResult<(LogicalPlan, Scope)> {
        let mut qualified = Vec::with_capacity(ctes.len());
        for cte in ctes {
            let (plan, scope) = self.plan(cte.plan, &[])?;
            if let Some(frame) = self.ctes.last_mut() {
                if frame.insert(cte.name.clone(), scope).is_some() {
                    return Err(QueryError::Schema(format!(
                        "common table expression '{}' defined twice",
                        cte.name
                    )));
                }
            }
            qualified.push(CommonTableExpr {
                name: cte.name,
                plan,
            });
        }
        let (body, scope) = self.plan(body, outer)?;
        Ok((
            LogicalPlan::With {
                ctes: qualified,
                body: Box::new(body),
            },
            scope,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit};
    use tern_core::schema::TableBuilder;
    use tern_core::DataType;
    use tern_storage::Catalog;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        for (name, cols) in [
            ("products", vec!["product_id", "name", "manufacturer_id"]),
            ("manufacturers", vec!["manufacturer_id", "name"]),
        ] {
            let mut b = TableBuilder::new(name).unwrap();
            for c in cols {
                b = b.add_column(c, DataType::Integer).unwrap();
            }
            catalog.register_table(b.build().unwrap()).unwrap();
        }
        catalog
    }

    fn qualify(plan: LogicalPlan) -> QueryResult<LogicalPlan> {
        let catalog = catalog();
        let snapshot = catalog.snapshot();
        QualifyColumns::new(&snapshot).optimize(plan)
    }

    #[test]
    fn test_qualifies_unique_names() {
        let plan = LogicalPlan::scan_as("products", "p").filter(col("product_id").gt(lit(3)));
        let out = qualify(plan).unwrap();
        match out {
            LogicalPlan::Filter { predicate, .. } => {
                assert_eq!(predicate, col("p.product_id").gt(lit(3)))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ambiguous_and_unknown() {
        let join = LogicalPlan::scan("products").inner_join(
            LogicalPlan::scan("manufacturers"),
            col("products.manufacturer_id").eq(col("manufacturers.manufacturer_id")),
        );
        let ambiguous = qualify(join.clone().filter(col("name").eq(lit(1))));
        assert!(matches!(ambiguous, Err(QueryError::Schema(m)) if m.contains("ambiguous")));

        let unknown = qualify(join.filter(col("price").eq(lit(1))));
        assert!(matches!(unknown, Err(QueryError::Schema(m)) if m.contains("price")));

        assert!(matches!(
            qualify(LogicalPlan::scan("nope")),
            Err(QueryError::Schema(_))
        ));
    }

    #[test]
    fn test_exists_resolves_outer_columns() {
        let sub = LogicalPlan::scan("products")
            .filter(col("products.manufacturer_id").eq(col("m.manufacturer_id")));
        let plan = LogicalPlan::scan_as("manufacturers", "m").filter(Expr::exists(sub));
        assert!(qualify(plan).is_ok());

        let scalar = LogicalPlan::scan("products")
            .filter(col("products.manufacturer_id").eq(col("m.manufacturer_id")));
        let plan = LogicalPlan::scan_as("manufacturers", "m")
            .filter(col("m.manufacturer_id").eq(Expr::scalar_subquery(scalar)));
        assert!(qualify(plan).is_err());
    }

    #[test]
    fn test_cte_scope() {
        let plan = LogicalPlan::with(
            vec![(
                "cheap",
                LogicalPlan::scan("products").project(vec![col("product_id").alias("id")]),
            )],
            LogicalPlan::cte_ref_as("cheap", "c").filter(col("c.id").lt(lit(5))),
        );
        assert!(qualify(plan).is_ok());
        assert!(qualify(LogicalPlan::cte_ref("missing")).is_err());
    }
}
