use crate::equation_engine::{self, is_known_function, Expr};
use crate::error::{EngineError, EngineResult};
use crate::text::{find_top_level, split_call, split_top_level};
use std::collections::HashMap;

/// A user-defined single-parameter function, `name(parameter) = body`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub parameter: String,
    pub body: Expr,
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().map_or(false, char::is_alphabetic)
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

impl FunctionDefinition {
    /// Parses `f(x) = x^2 + 1`.
    pub fn parse(text: &str) -> EngineResult<Self> {
        let eq = find_top_level(text, '=')
            .ok_or_else(|| EngineError::InvalidInput(format!("'{text}' is not a definition")))?;
        let (head, body) = (&text[..eq], &text[eq + 1..]);
        let (name, params) = split_call(head)
            .ok_or_else(|| EngineError::InvalidInput(format!("malformed head '{}'", head.trim())))?;
        let [parameter] = params.as_slice() else {
            return Err(EngineError::InvalidInput(format!(
                "{name} must take exactly one parameter"
            )));
        };
        if !is_identifier(parameter) {
            return Err(EngineError::InvalidInput(format!(
                "'{parameter}' is not a parameter name"
            )));
        }
        if is_known_function(&name) || Expr::constant_value(&name).is_some() {
            return Err(EngineError::InvalidInput(format!(
                "'{name}' is a builtin and cannot be redefined"
            )));
        }
        let body = equation_engine::parse(body.trim()).map_err(EngineError::Parse)?;
        Ok(Self {
            name,
            parameter: parameter.clone(),
            body,
        })
    }

    /// Parses definitions separated by newlines or semicolons, skipping blanks.
    pub fn parse_many(text: &str) -> EngineResult<Vec<Self>> {
        split_top_level(text, &['\n', ';'])
            .iter()
            .filter(|line| !line.is_empty())
            .map(|line| Self::parse(line))
            .collect()
    }
}

/// The set of user-defined functions, rebuilt wholesale on change.
///
/// `version` increases on every rebuild and is part of the compile-cache key,
/// so evaluators built against an older registry are never served.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    definitions: HashMap<String, FunctionDefinition>,
    version: u64,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild(&mut self, definitions: Vec<FunctionDefinition>) {
        self.definitions = definitions
            .into_iter()
            .map(|def| (def.name.clone(), def))
            .collect();
        self.version += 1;
        log::debug!(
            "function registry rebuilt: {} definitions, version {}",
            self.definitions.len(),
            self.version
        );
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDefinition> {
        self.definitions.get(name)
    }

    /// Inlines registered calls. A name already being resolved is left as a
    /// call, and nothing expands past `max_depth` levels.
    pub fn expand(&self, expr: &Expr, max_depth: usize) -> Expr {
        let mut resolving = Vec::new();
        self.expand_with(expr, &mut resolving, max_depth)
    }

    fn expand_with(&self, expr: &Expr, resolving: &mut Vec<String>, max_depth: usize) -> Expr {
        match expr {
            Expr::Number(_) | Expr::Variable(_) => expr.clone(),
            Expr::Unary(op, operand) => {
                Expr::Unary(*op, Box::new(self.expand_with(operand, resolving, max_depth)))
            }
            Expr::Binary(left, op, right) => Expr::binary(
                self.expand_with(left, resolving, max_depth),
                *op,
                self.expand_with(right, resolving, max_depth),
            ),
            Expr::Call(name, args) => {
                let args: Vec<Expr> = args
                    .iter()
                    .map(|a| self.expand_with(a, resolving, max_depth))
                    .collect();
                let definition = match (self.definitions.get(name), args.as_slice()) {
                    (Some(def), [_]) if !resolving.contains(name) && resolving.len() < max_depth => {
                        def
                    }
                    _ => return Expr::Call(name.clone(), args),
                };
                let body = definition.body.substitute(&definition.parameter, &args[0]);
                resolving.push(name.clone());
                let expanded = self.expand_with(&body, resolving, max_depth);
                resolving.pop();
                expanded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FunctionDefinition, FunctionRegistry};
    use crate::equation_engine::{parse, Evaluator, Expr, Scope};

    fn registry(text: &str) -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry.rebuild(FunctionDefinition::parse_many(text).expect("definitions"));
        registry
    }

    #[test]
    fn expands_nested_definitions() {
        let registry = registry("f(x) = x^2; g(t) = f(t) + 1");
        let expanded = registry.expand(&parse("g(f(y))").expect("parse"), 16);
        let value = Evaluator::new(&expanded)
            .expect("compile")
            .evaluate(&Scope::new().with("y", 2.0));
        assert_eq!(value, 17.0);
    }

    #[test]
    fn self_reference_terminates_unexpanded() {
        let registry = registry("f(x) = f(x) + 1");
        let expanded = registry.expand(&parse("f(2)").expect("parse"), 16);
        assert!(matches!(&expanded, Expr::Binary(left, '+', _) if matches!(**left, Expr::Call(..))));
        assert!(Evaluator::new(&expanded).is_err());
    }

    #[test]
    fn mutual_recursion_terminates() {
        let registry = registry("f(x) = g(x)\ng(x) = f(x)");
        let expanded = registry.expand(&parse("f(1)").expect("parse"), 16);
        assert_eq!(expanded, parse("f(1)").expect("parse"));
    }

    #[test]
    fn version_increases_on_rebuild() {
        let mut registry = FunctionRegistry::new();
        let before = registry.version();
        registry.rebuild(Vec::new());
        assert!(registry.version() > before);
    }

    #[test]
    fn rejects_malformed_definitions() {
        assert!(FunctionDefinition::parse("f(x, y) = x").is_err());
        assert!(FunctionDefinition::parse("sin(x) = x").is_err());
        assert!(FunctionDefinition::parse("x^2").is_err());
        assert!(FunctionDefinition::parse("f(x) = (x").is_err());
    }
}
