//! Fluent namespace table: a fixed nested map from dotted path segments to
//! what the path stands for. Built from a [`Stdlib`], so a symbol missing
//! from that version is missing from the table too.

use std::collections::BTreeMap;

use super::{COLUMNS, Category, Implicit, Stdlib};

/// Top-level namespaces of the fluent surface.
pub const ROOTS: &[&str] = &["indicator", "input", "strategy", "market", "pattern"];

/// `market.<field>` accessors and the state symbol each maps to.
const MARKET_FIELDS: &[(&str, &str)] = &[
    ("position", "position_size"),
    ("bar_index", "bar_index"),
    ("pnl", "realized_pnl"),
];

const DIRECTIONS: &[&str] = &["long", "short"];

/// What a fully resolved path means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Call `symbol` with `implicit` columns in front of any explicit arguments.
    Call {
        symbol: &'static str,
        implicit: Vec<&'static str>,
    },
    /// An input column.
    Column(&'static str),
    /// A string constant such as `strategy.long`.
    Constant(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Branch(BTreeMap<&'static str, Node>),
    Leaf(Target),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTable {
    root: BTreeMap<&'static str, Node>,
}

impl NamespaceTable {
    pub fn build(stdlib: &Stdlib) -> Self {
        let mut indicator = BTreeMap::new();
        let mut strategy = BTreeMap::new();
        let mut pattern = BTreeMap::new();
        let mut market = BTreeMap::new();

        for def in stdlib.symbols() {
            let node = match def.implicit {
                Implicit::PerColumn => Node::Branch(
                    COLUMNS
                        .iter()
                        .map(|col| {
                            (
                                *col,
                                Node::Leaf(Target::Call {
                                    symbol: def.name,
                                    implicit: vec![*col],
                                }),
                            )
                        })
                        .collect(),
                ),
                Implicit::Columns(cols) => Node::Leaf(Target::Call {
                    symbol: def.name,
                    implicit: cols.to_vec(),
                }),
                Implicit::None => Node::Leaf(Target::Call {
                    symbol: def.name,
                    implicit: Vec::new(),
                }),
            };
            match def.category {
                Category::Indicator => {
                    indicator.insert(def.name, node);
                }
                Category::Pattern => {
                    pattern.insert(def.name, node);
                }
                Category::Action => {
                    strategy.insert(def.name, node);
                }
                Category::Math | Category::State => {}
            }
        }

        for direction in DIRECTIONS {
            strategy.insert(*direction, Node::Leaf(Target::Constant(*direction)));
        }

        for (field, symbol) in MARKET_FIELDS {
            if let Some(def) = stdlib.lookup(symbol) {
                market.insert(
                    *field,
                    Node::Leaf(Target::Call {
                        symbol: def.name,
                        implicit: Vec::new(),
                    }),
                );
            }
        }

        let input = COLUMNS
            .iter()
            .map(|col| (*col, Node::Leaf(Target::Column(*col))))
            .collect();

        let mut root = BTreeMap::new();
        root.insert("indicator", Node::Branch(indicator));
        root.insert("input", Node::Branch(input));
        root.insert("strategy", Node::Branch(strategy));
        root.insert("market", Node::Branch(market));
        root.insert("pattern", Node::Branch(pattern));
        Self { root }
    }

    pub fn is_root(&self, name: &str) -> bool {
        self.root.contains_key(name)
    }

    /// Resolve a complete path. Paths that stop at a branch resolve to nothing.
    pub fn resolve(&self, path: &[&str]) -> Option<&Target> {
        let (first, rest) = path.split_first()?;
        let mut node = self.root.get(*first)?;
        for segment in rest {
            match node {
                Node::Branch(children) => node = children.get(*segment)?,
                Node::Leaf(_) => return None,
            }
        }
        match node {
            Node::Leaf(target) => Some(target),
            Node::Branch(_) => None,
        }
    }

    /// Every resolvable path, in lexical order.
    pub fn paths(&self) -> Vec<(String, &Target)> {
        fn collect<'a>(prefix: &str, node: &'a Node, out: &mut Vec<(String, &'a Target)>) {
            match node {
                Node::Leaf(target) => out.push((prefix.to_string(), target)),
                Node::Branch(children) => {
                    for (name, child) in children {
                        collect(&format!("{prefix}.{name}"), child, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        for (name, node) in &self.root {
            collect(name, node, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stdlib::StdlibVersion;

    fn table() -> NamespaceTable {
        NamespaceTable::build(&Stdlib::current())
    }

    #[test]
    fn per_column_indicator() {
        assert_eq!(
            table().resolve(&["indicator", "rsi", "close"]),
            Some(&Target::Call {
                symbol: "rsi",
                implicit: vec!["close"]
            })
        );
    }

    #[test]
    fn fixed_column_indicator() {
        assert_eq!(
            table().resolve(&["indicator", "atr"]),
            Some(&Target::Call {
                symbol: "atr",
                implicit: vec!["high", "low", "close"]
            })
        );
        assert_eq!(
            table().resolve(&["pattern", "doji"]),
            Some(&Target::Call {
                symbol: "doji",
                implicit: vec!["open", "high", "low", "close"]
            })
        );
    }

    #[test]
    fn inputs_constants_and_market() {
        let t = table();
        assert_eq!(t.resolve(&["input", "volume"]), Some(&Target::Column("volume")));
        assert_eq!(t.resolve(&["strategy", "short"]), Some(&Target::Constant("short")));
        assert_eq!(
            t.resolve(&["market", "pnl"]),
            Some(&Target::Call {
                symbol: "realized_pnl",
                implicit: vec![]
            })
        );
    }

    #[test]
    fn partial_and_unknown_paths_do_not_resolve() {
        let t = table();
        assert_eq!(t.resolve(&["indicator", "rsi"]), None);
        assert_eq!(t.resolve(&["indicator", "rsi", "close", "x"]), None);
        assert_eq!(t.resolve(&["indicator", "nope", "close"]), None);
        assert_eq!(t.resolve(&["os", "system"]), None);
        assert_eq!(t.resolve(&["indicator", "sqrt"]), None);
    }

    #[test]
    fn table_follows_stdlib_version() {
        let old = NamespaceTable::build(&Stdlib::for_version(StdlibVersion::V1_0).unwrap());
        assert!(old.resolve(&["indicator", "stdev", "close"]).is_some());
        assert!(old.resolve(&["indicator", "stddev", "close"]).is_none());
        assert!(old.resolve(&["indicator", "stochastic"]).is_none());
        assert!(table().resolve(&["indicator", "stddev", "close"]).is_some());
    }

    #[test]
    fn paths_lists_leaves() {
        let table = table();
        let paths = table.paths();
        assert!(paths.iter().any(|(p, _)| p == "indicator.sma.close"));
        assert!(paths.iter().any(|(p, _)| p == "strategy.entry"));
        assert!(!paths.iter().any(|(p, _)| p == "indicator.sma"));
    }
}
