use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;

use serde::{Deserialize, Serialize};
use swept_core::errors::{ErrorInfo, SweepError};

/// Grid points per launch-width unit used when deriving `lx` from `nX`.
pub const LX_GRID_UNIT: u64 = 10_000;

/// Derives the launch width handed to the solver for a grid of `nx` points.
pub fn lx_for(nx: u64) -> u64 {
    nx / LX_GRID_UNIT + 1
}

/// Human readable label for a scheme identifier.
pub fn scheme_label(scheme: &str) -> &str {
    match scheme {
        "S" => "Classic",
        "C" => "Swept",
        other => other,
    }
}

/// Declarative description of a parameter sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSpec {
    #[serde(default = "SweepSpec::default_equations")]
    pub equations: Vec<String>,
    #[serde(default = "SweepSpec::default_schemes")]
    pub schemes: Vec<String>,
    #[serde(default = "SweepSpec::default_tpb")]
    pub tpb: Vec<u32>,
    #[serde(default = "SweepSpec::default_nx", rename = "nX")]
    pub nx: Vec<u64>,
    #[serde(default = "SweepSpec::default_gpu_a", rename = "gpuA")]
    pub gpu_a: Vec<f64>,
    #[serde(default = "SweepSpec::default_freq")]
    pub freq: u32,
    #[serde(default = "SweepSpec::default_nproc")]
    pub nproc: u32,
    /// Launcher options, already split into individual arguments.
    #[serde(default)]
    pub launcher_opts: Vec<String>,
}

impl SweepSpec {
    fn default_equations() -> Vec<String> {
        vec!["heat".to_string(), "euler".to_string()]
    }

    fn default_schemes() -> Vec<String> {
        vec!["S".to_string(), "C".to_string()]
    }

    fn default_tpb() -> Vec<u32> {
        (6..10).map(|k| 1u32 << k).collect()
    }

    fn default_nx() -> Vec<u64> {
        (12..21).map(|k| 1u64 << k).collect()
    }

    fn default_gpu_a() -> Vec<f64> {
        (1..15).map(|k| k as f64 / 1.5).collect()
    }

    const fn default_freq() -> u32 {
        200
    }

    const fn default_nproc() -> u32 {
        8
    }

    /// Checks that every sequence is non-empty, duplicate free and positive.
    pub fn validate(&self) -> Result<(), SweepError> {
        check_names("equations", &self.equations)?;
        check_names("schemes", &self.schemes)?;
        check_values("tpb", &self.tpb, |v| *v > 0, |v| *v as u64)?;
        check_values("nX", &self.nx, |v| *v > 0, |v| *v)?;
        check_values(
            "gpuA",
            &self.gpu_a,
            |v| v.is_finite() && *v > 0.0,
            |v| v.to_bits(),
        )?;
        if self.freq == 0 {
            return Err(SweepError::invalid_spec(
                "non_positive_freq",
                "sampling frequency must be positive",
            ));
        }
        if self.nproc == 0 {
            return Err(SweepError::invalid_spec(
                "non_positive_nproc",
                "process count must be positive",
            ));
        }
        Ok(())
    }

    /// Total number of run configurations described by this sweep.
    pub fn run_count(&self) -> usize {
        self.equations.len() * self.schemes.len() * self.configs_per_pair()
    }

    fn configs_per_pair(&self) -> usize {
        self.tpb.len() * self.nx.len() * self.gpu_a.len()
    }
}

impl Default for SweepSpec {
    fn default() -> Self {
        Self {
            equations: Self::default_equations(),
            schemes: Self::default_schemes(),
            tpb: Self::default_tpb(),
            nx: Self::default_nx(),
            gpu_a: Self::default_gpu_a(),
            freq: Self::default_freq(),
            nproc: Self::default_nproc(),
            launcher_opts: Vec::new(),
        }
    }
}

fn check_names(field: &str, names: &[String]) -> Result<(), SweepError> {
    check_values(field, names, |name| !name.trim().is_empty(), |name| name.clone())
}

fn check_values<T, K, P, F>(field: &str, values: &[T], valid: P, key: F) -> Result<(), SweepError>
where
    T: fmt::Debug,
    K: Eq + Hash,
    P: Fn(&T) -> bool,
    F: Fn(&T) -> K,
{
    if values.is_empty() {
        return Err(SweepError::InvalidSpec(
            ErrorInfo::new("empty_sequence", format!("{field} must not be empty"))
                .with_context("field", field),
        ));
    }
    let mut seen = HashSet::with_capacity(values.len());
    for value in values {
        if !valid(value) {
            return Err(SweepError::InvalidSpec(
                ErrorInfo::new("non_positive_value", format!("{field} contains {value:?}"))
                    .with_context("field", field)
                    .with_hint("sweep values must be positive and finite"),
            ));
        }
        if !seen.insert(key(value)) {
            return Err(SweepError::InvalidSpec(
                ErrorInfo::new("duplicate_value", format!("{field} repeats {value:?}"))
                    .with_context("field", field),
            ));
        }
    }
    Ok(())
}

/// One concrete combination of sweep parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub equation: String,
    pub scheme: String,
    pub tpb: u32,
    #[serde(rename = "nX")]
    pub nx: u64,
    pub lx: u64,
    #[serde(rename = "gpuA")]
    pub gpu_a: f64,
    pub freq: u32,
}

impl RunConfig {
    /// Builds a config, deriving `lx` from `nx`.
    pub fn new(
        equation: impl Into<String>,
        scheme: impl Into<String>,
        tpb: u32,
        nx: u64,
        gpu_a: f64,
        freq: u32,
    ) -> Self {
        Self {
            equation: equation.into(),
            scheme: scheme.into(),
            tpb,
            nx,
            lx: lx_for(nx),
            gpu_a,
            freq,
        }
    }

    /// Solver arguments in the order the external binary expects them.
    pub fn solver_args(&self) -> Vec<String> {
        vec![
            "freq".to_string(),
            self.freq.to_string(),
            "gpuA".to_string(),
            format!("{:.4}", self.gpu_a),
            "nX".to_string(),
            self.nx.to_string(),
            "tpb".to_string(),
            self.tpb.to_string(),
            "lx".to_string(),
            self.lx.to_string(),
        ]
    }
}

impl PartialEq for RunConfig {
    fn eq(&self, other: &Self) -> bool {
        self.equation == other.equation
            && self.scheme == other.scheme
            && self.tpb == other.tpb
            && self.nx == other.nx
            && self.lx == other.lx
            && self.gpu_a.to_bits() == other.gpu_a.to_bits()
            && self.freq == other.freq
    }
}

impl Eq for RunConfig {}

impl Hash for RunConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.equation.hash(state);
        self.scheme.hash(state);
        self.tpb.hash(state);
        self.nx.hash(state);
        self.lx.hash(state);
        self.gpu_a.to_bits().hash(state);
        self.freq.hash(state);
    }
}

impl fmt::Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} tpb={} nX={} lx={} gpuA={:.4} freq={}",
            self.equation, self.scheme, self.tpb, self.nx, self.lx, self.gpu_a, self.freq
        )
    }
}

/// An (equation, scheme) pair; the unit of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SweepPair {
    pub equation: String,
    pub scheme: String,
}

impl SweepPair {
    pub fn new(equation: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            equation: equation.into(),
            scheme: scheme.into(),
        }
    }

    /// Display label such as `heat Classic`.
    pub fn label(&self) -> String {
        format!("{} {}", self.equation, scheme_label(&self.scheme))
    }

    /// File name of the timing artifact the solver writes, e.g. `tHeatS.json`.
    pub fn timing_title(&self) -> String {
        let mut chars = self.equation.chars();
        let title = match chars.next() {
            Some(first) => first
                .to_uppercase()
                .chain(chars.flat_map(|c| c.to_lowercase()))
                .collect::<String>(),
            None => String::new(),
        };
        format!("t{}{}.json", title, self.scheme)
    }

    /// Stem used for files this driver writes about the pair.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.equation, self.scheme)
    }
}

impl fmt::Display for SweepPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.equation, self.scheme)
    }
}

/// Deterministic enumeration of the run configurations of a [`SweepSpec`].
///
/// The product is nested equation outermost, then scheme, tpb, nX and gpuA
/// innermost, so consecutive runs share a compiled kernel configuration.
#[derive(Debug, Clone)]
pub struct ParameterSpace<'a> {
    spec: &'a SweepSpec,
    equations: Range<usize>,
    schemes: Range<usize>,
}

impl<'a> ParameterSpace<'a> {
    /// Validates `spec` and spans its full product.
    pub fn new(spec: &'a SweepSpec) -> Result<Self, SweepError> {
        spec.validate()?;
        Ok(Self {
            spec,
            equations: 0..spec.equations.len(),
            schemes: 0..spec.schemes.len(),
        })
    }

    /// Restricts the enumeration to a single (equation, scheme) pair.
    pub fn for_pair(spec: &'a SweepSpec, pair: &SweepPair) -> Result<Self, SweepError> {
        spec.validate()?;
        let eq = position(&spec.equations, &pair.equation, "equation")?;
        let sc = position(&spec.schemes, &pair.scheme, "scheme")?;
        Ok(Self {
            spec,
            equations: eq..eq + 1,
            schemes: sc..sc + 1,
        })
    }

    /// The pairs covered by this space, in enumeration order.
    pub fn pairs(&self) -> Vec<SweepPair> {
        self.equations
            .clone()
            .flat_map(|eq| {
                self.schemes.clone().map(move |sc| {
                    SweepPair::new(&self.spec.equations[eq], &self.spec.schemes[sc])
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.equations.len() * self.schemes.len() * self.spec.configs_per_pair()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a fresh pass over the space.
    pub fn iter(&self) -> Configs<'a> {
        Configs {
            spec: self.spec,
            equations: self.equations.clone(),
            schemes: self.schemes.clone(),
            pos: 0,
            end: self.len(),
        }
    }
}

impl<'a> IntoIterator for &ParameterSpace<'a> {
    type Item = RunConfig;
    type IntoIter = Configs<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn position(values: &[String], wanted: &str, field: &str) -> Result<usize, SweepError> {
    values.iter().position(|v| v == wanted).ok_or_else(|| {
        SweepError::InvalidSpec(
            ErrorInfo::new("unknown_pair", format!("{field} {wanted} is not part of the sweep"))
                .with_context(field, wanted),
        )
    })
}

/// Lazy iterator over a [`ParameterSpace`].
#[derive(Debug, Clone)]
pub struct Configs<'a> {
    spec: &'a SweepSpec,
    equations: Range<usize>,
    schemes: Range<usize>,
    pos: usize,
    end: usize,
}

impl Configs<'_> {
    fn decode(&self, mut pos: usize) -> RunConfig {
        let spec = self.spec;
        let gpu = pos % spec.gpu_a.len();
        pos /= spec.gpu_a.len();
        let nx = pos % spec.nx.len();
        pos /= spec.nx.len();
        let tpb = pos % spec.tpb.len();
        pos /= spec.tpb.len();
        let sc = pos % self.schemes.len();
        pos /= self.schemes.len();
        let eq = pos;
        RunConfig::new(
            &spec.equations[self.equations.start + eq],
            &spec.schemes[self.schemes.start + sc],
            spec.tpb[tpb],
            spec.nx[nx],
            spec.gpu_a[gpu],
            spec.freq,
        )
    }
}

impl Iterator for Configs<'_> {
    type Item = RunConfig;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        let config = self.decode(self.pos);
        self.pos += 1;
        Some(config)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.pos;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Configs<'_> {}
