//! The closed, versioned standard library.
//!
//! Every callable a program can reach is a [`SymbolDef`] in [`SYMBOLS`]. A
//! [`Stdlib`] is the view of that table for one version: symbols introduced
//! later or removed earlier are simply absent, so name resolution, the
//! fluent namespace and the type checker all agree on what exists.

pub mod namespace;

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::types::RecordKind;

/// Version of the surface grammar. Part of every cache key.
pub const GRAMMAR_VERSION: &str = "1";

/// Input columns a program may reference.
pub const COLUMNS: &[&str] = &["open", "high", "low", "close", "volume"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StdlibVersion {
    pub major: u16,
    pub minor: u16,
}

impl StdlibVersion {
    pub const V1_0: StdlibVersion = StdlibVersion { major: 1, minor: 0 };
    pub const V1_1: StdlibVersion = StdlibVersion { major: 1, minor: 1 };
    pub const CURRENT: StdlibVersion = StdlibVersion::V1_1;
    pub const SUPPORTED: &'static [StdlibVersion] = &[StdlibVersion::V1_0, StdlibVersion::V1_1];

    /// Parse `major.minor`. A bare major (`"1"`) means `major.0`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (major, minor) = match text.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (text, "0"),
        };
        Some(StdlibVersion {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }

    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self)
    }
}

impl fmt::Display for StdlibVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// What an argument position accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Scalar or Series.
    Numeric,
    Scalar,
    /// Scalar holding a positive integer; literals are checked at compile time.
    Period,
    Str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub default: Option<f64>,
}

const fn req(name: &'static str, kind: ArgKind) -> ArgSpec {
    ArgSpec {
        name,
        kind,
        default: None,
    }
}

const fn opt(name: &'static str, kind: ArgKind, default: f64) -> ArgSpec {
    ArgSpec {
        name,
        kind,
        default: Some(default),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    Series,
    BooleanSeries,
    Record(RecordKind),
    Scalar,
    Void,
    /// Series if any numeric argument is a Series, otherwise Scalar.
    SameAsNumeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Indicator,
    Pattern,
    Math,
    Action,
    State,
}

impl Category {
    /// Actions and state accessors only make sense inside `@strategy`.
    pub fn strategy_only(self) -> bool {
        matches!(self, Category::Action | Category::State)
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Indicator => "indicator",
            Category::Pattern => "pattern",
            Category::Math => "math",
            Category::Action => "action",
            Category::State => "state",
        }
    }
}

/// Columns the fluent surface supplies in front of the caller's arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Implicit {
    None,
    /// `indicator.<sym>.<column>(...)`: the chosen column is the first argument.
    PerColumn,
    Columns(&'static [&'static str]),
}

/// Evaluation rule bound to a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Sma,
    Ema,
    Wma,
    Rsi,
    Roc,
    Stddev,
    Highest,
    Lowest,
    Change,
    Prev,
    Atr,
    Obv,
    Macd,
    Bollinger,
    Stochastic,
    Crossover,
    Crossunder,
    Rising,
    Falling,
    Doji,
    BullishEngulfing,
    BearishEngulfing,
    Abs,
    Sqrt,
    Log,
    Max,
    Min,
    Nz,
    Entry,
    Exit,
    CloseAll,
    PositionSize,
    BarIndex,
    RealizedPnl,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolDef {
    pub name: &'static str,
    pub builtin: Builtin,
    pub args: &'static [ArgSpec],
    pub returns: Returns,
    pub category: Category,
    pub implicit: Implicit,
    pub since: StdlibVersion,
    pub removed_in: Option<StdlibVersion>,
}

impl SymbolDef {
    pub fn min_args(&self) -> usize {
        self.args.iter().filter(|a| a.default.is_none()).count()
    }

    pub fn max_args(&self) -> usize {
        self.args.len()
    }

    pub fn available_in(&self, version: StdlibVersion) -> bool {
        version >= self.since && self.removed_in.is_none_or(|removed| version < removed)
    }

    /// Human-readable signature, e.g. `sma(source, period)`.
    pub fn signature(&self) -> String {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| match a.default {
                Some(d) => format!("{}={}", a.name, d),
                None => a.name.to_string(),
            })
            .collect();
        format!("{}({})", self.name, args.join(", "))
    }
}

use ArgKind::{Numeric, Period, Scalar as ScalarArg, Str};

const SOURCE_PERIOD: &[ArgSpec] = &[req("source", Numeric), req("period", Period)];
const SOURCE_LAG: &[ArgSpec] = &[req("source", Numeric), opt("lag", Period, 1.0)];
const UNARY: &[ArgSpec] = &[req("x", Numeric)];
const BINARY: &[ArgSpec] = &[req("a", Numeric), req("b", Numeric)];
const CANDLE: &[ArgSpec] = &[
    req("open", Numeric),
    req("high", Numeric),
    req("low", Numeric),
    req("close", Numeric),
];
const NO_ARGS: &[ArgSpec] = &[];
const ATR_ARGS: &[ArgSpec] = &[
    req("high", Numeric),
    req("low", Numeric),
    req("close", Numeric),
    req("period", Period),
];
const OBV_ARGS: &[ArgSpec] = &[req("close", Numeric), req("volume", Numeric)];
const MACD_ARGS: &[ArgSpec] = &[
    req("source", Numeric),
    opt("fast", Period, 12.0),
    opt("slow", Period, 26.0),
    opt("signal", Period, 9.0),
];
const BOLLINGER_ARGS: &[ArgSpec] = &[
    req("source", Numeric),
    opt("period", Period, 20.0),
    opt("mult", ScalarArg, 2.0),
];
const STOCHASTIC_ARGS: &[ArgSpec] = &[
    req("high", Numeric),
    req("low", Numeric),
    req("close", Numeric),
    opt("k", Period, 14.0),
    opt("d", Period, 3.0),
];
const NZ_ARGS: &[ArgSpec] = &[req("x", Numeric), opt("fallback", ScalarArg, 0.0)];
const ENTRY_ARGS: &[ArgSpec] = &[req("id", Str), req("direction", Str), opt("qty", ScalarArg, 1.0)];
const EXIT_ARGS: &[ArgSpec] = &[req("id", Str)];

const CLOSE_VOLUME: &[&str] = &["close", "volume"];
const HLC: &[&str] = &["high", "low", "close"];
const OHLC: &[&str] = &["open", "high", "low", "close"];

const fn indicator(
    name: &'static str,
    builtin: Builtin,
    args: &'static [ArgSpec],
    returns: Returns,
    implicit: Implicit,
) -> SymbolDef {
    SymbolDef {
        name,
        builtin,
        args,
        returns,
        category: Category::Indicator,
        implicit,
        since: StdlibVersion::V1_0,
        removed_in: None,
    }
}

const fn simple(name: &'static str, builtin: Builtin, args: &'static [ArgSpec], returns: Returns, category: Category) -> SymbolDef {
    SymbolDef {
        name,
        builtin,
        args,
        returns,
        category,
        implicit: Implicit::None,
        since: StdlibVersion::V1_0,
        removed_in: None,
    }
}

const fn since(def: SymbolDef, version: StdlibVersion) -> SymbolDef {
    SymbolDef {
        since: version,
        ..def
    }
}

const fn removed(def: SymbolDef, version: StdlibVersion) -> SymbolDef {
    SymbolDef {
        removed_in: Some(version),
        ..def
    }
}

/// Every symbol of every stdlib version.
pub static SYMBOLS: &[SymbolDef] = &[
    indicator("sma", Builtin::Sma, SOURCE_PERIOD, Returns::Series, Implicit::PerColumn),
    indicator("ema", Builtin::Ema, SOURCE_PERIOD, Returns::Series, Implicit::PerColumn),
    since(
        indicator("wma", Builtin::Wma, SOURCE_PERIOD, Returns::Series, Implicit::PerColumn),
        StdlibVersion::V1_1,
    ),
    indicator("rsi", Builtin::Rsi, SOURCE_PERIOD, Returns::Series, Implicit::PerColumn),
    indicator("roc", Builtin::Roc, SOURCE_PERIOD, Returns::Series, Implicit::PerColumn),
    removed(
        indicator("stdev", Builtin::Stddev, SOURCE_PERIOD, Returns::Series, Implicit::PerColumn),
        StdlibVersion::V1_1,
    ),
    since(
        indicator("stddev", Builtin::Stddev, SOURCE_PERIOD, Returns::Series, Implicit::PerColumn),
        StdlibVersion::V1_1,
    ),
    since(
        indicator("highest", Builtin::Highest, SOURCE_PERIOD, Returns::Series, Implicit::PerColumn),
        StdlibVersion::V1_1,
    ),
    since(
        indicator("lowest", Builtin::Lowest, SOURCE_PERIOD, Returns::Series, Implicit::PerColumn),
        StdlibVersion::V1_1,
    ),
    indicator("change", Builtin::Change, SOURCE_LAG, Returns::Series, Implicit::PerColumn),
    indicator("prev", Builtin::Prev, SOURCE_LAG, Returns::Series, Implicit::PerColumn),
    indicator(
        "atr",
        Builtin::Atr,
        ATR_ARGS,
        Returns::Series,
        Implicit::Columns(HLC),
    ),
    indicator(
        "obv",
        Builtin::Obv,
        OBV_ARGS,
        Returns::Series,
        Implicit::Columns(CLOSE_VOLUME),
    ),
    indicator(
        "macd",
        Builtin::Macd,
        MACD_ARGS,
        Returns::Record(RecordKind::Macd),
        Implicit::PerColumn,
    ),
    indicator(
        "bollinger",
        Builtin::Bollinger,
        BOLLINGER_ARGS,
        Returns::Record(RecordKind::Bollinger),
        Implicit::PerColumn,
    ),
    since(
        indicator(
            "stochastic",
            Builtin::Stochastic,
            STOCHASTIC_ARGS,
            Returns::Record(RecordKind::Stochastic),
            Implicit::Columns(HLC),
        ),
        StdlibVersion::V1_1,
    ),
    simple("crossover", Builtin::Crossover, BINARY, Returns::BooleanSeries, Category::Pattern),
    simple("crossunder", Builtin::Crossunder, BINARY, Returns::BooleanSeries, Category::Pattern),
    simple("rising", Builtin::Rising, SOURCE_PERIOD, Returns::BooleanSeries, Category::Pattern),
    simple("falling", Builtin::Falling, SOURCE_PERIOD, Returns::BooleanSeries, Category::Pattern),
    SymbolDef {
        implicit: Implicit::Columns(OHLC),
        ..simple("doji", Builtin::Doji, CANDLE, Returns::BooleanSeries, Category::Pattern)
    },
    SymbolDef {
        implicit: Implicit::Columns(OHLC),
        ..simple(
            "bullish_engulfing",
            Builtin::BullishEngulfing,
            CANDLE,
            Returns::BooleanSeries,
            Category::Pattern,
        )
    },
    SymbolDef {
        implicit: Implicit::Columns(OHLC),
        ..simple(
            "bearish_engulfing",
            Builtin::BearishEngulfing,
            CANDLE,
            Returns::BooleanSeries,
            Category::Pattern,
        )
    },
    simple("abs", Builtin::Abs, UNARY, Returns::SameAsNumeric, Category::Math),
    simple("sqrt", Builtin::Sqrt, UNARY, Returns::SameAsNumeric, Category::Math),
    simple("log", Builtin::Log, UNARY, Returns::SameAsNumeric, Category::Math),
    simple("max", Builtin::Max, BINARY, Returns::SameAsNumeric, Category::Math),
    simple("min", Builtin::Min, BINARY, Returns::SameAsNumeric, Category::Math),
    simple(
        "nz",
        Builtin::Nz,
        NZ_ARGS,
        Returns::SameAsNumeric,
        Category::Math,
    ),
    simple(
        "entry",
        Builtin::Entry,
        ENTRY_ARGS,
        Returns::Void,
        Category::Action,
    ),
    simple("exit", Builtin::Exit, EXIT_ARGS, Returns::Void, Category::Action),
    simple("close_all", Builtin::CloseAll, NO_ARGS, Returns::Void, Category::Action),
    simple("position_size", Builtin::PositionSize, NO_ARGS, Returns::Scalar, Category::State),
    simple("bar_index", Builtin::BarIndex, NO_ARGS, Returns::Scalar, Category::State),
    simple("realized_pnl", Builtin::RealizedPnl, NO_ARGS, Returns::Scalar, Category::State),
];

/// The symbol table for one stdlib version.
#[derive(Debug, Clone)]
pub struct Stdlib {
    version: StdlibVersion,
    symbols: BTreeMap<&'static str, &'static SymbolDef>,
}

impl Stdlib {
    /// Returns `None` for versions this build does not ship.
    pub fn for_version(version: StdlibVersion) -> Option<Self> {
        if !version.is_supported() {
            return None;
        }
        let symbols = SYMBOLS
            .iter()
            .filter(|def| def.available_in(version))
            .map(|def| (def.name, def))
            .collect();
        Some(Self { version, symbols })
    }

    pub fn current() -> Self {
        Self::for_version(StdlibVersion::CURRENT).unwrap_or_else(|| Self {
            version: StdlibVersion::CURRENT,
            symbols: BTreeMap::new(),
        })
    }

    pub fn version(&self) -> StdlibVersion {
        self.version
    }

    pub fn lookup(&self, name: &str) -> Option<&'static SymbolDef> {
        self.symbols.get(name).copied()
    }

    /// Symbols in name order.
    pub fn symbols(&self) -> impl Iterator<Item = &'static SymbolDef> + '_ {
        self.symbols.values().copied()
    }

    /// A symbol that exists in some other version but not this one.
    pub fn foreign(&self, name: &str) -> Option<&'static SymbolDef> {
        if self.symbols.contains_key(name) {
            return None;
        }
        SYMBOLS.iter().find(|def| def.name == name)
    }
}

/// True for any name used by the stdlib of any version.
pub fn is_symbol_name(name: &str) -> bool {
    SYMBOLS.iter().any(|def| def.name == name)
}

pub fn is_column(name: &str) -> bool {
    COLUMNS.contains(&name)
}
