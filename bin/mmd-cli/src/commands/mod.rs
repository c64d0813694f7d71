// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommands and the argument handling they share.

pub mod inspect;
pub mod plan;
pub mod run;

use std::path::Path;

use dispatch_runtime::{DispatchConfig, OperatorKind, PlanJob};
use matmul_planner::CubeMathType;
use tensor_core::{DType, Layout, Shape, TensorDesc};
use tracing_subscriber::EnvFilter;

/// Maps `-v` repetitions onto a log level. `RUST_LOG` wins when set.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<DispatchConfig> {
    match path {
        Some(path) => Ok(DispatchConfig::from_file(path)?),
        None => Ok(DispatchConfig::default()),
    }
}

/// Operand description shared by `plan` and `run`.
///
/// Shapes are given in storage order: a transposed lhs is `[.., K, M]`.
#[derive(clap::Args, Debug, Clone)]
pub struct CallArgs {
    /// Left operand dims, comma-separated (e.g. "4,16").
    #[arg(long)]
    pub lhs: String,

    /// Right operand dims, comma-separated.
    #[arg(long)]
    pub rhs: String,

    /// Bias or `self` dims; turns the call into addmm/baddbmm.
    #[arg(long)]
    pub bias: Option<String>,

    /// Element type of the left operand (and of the right one by default).
    #[arg(long, default_value = "f16")]
    pub dtype: String,

    #[arg(long)]
    pub rhs_dtype: Option<String>,

    /// Output element type; defaults to the left operand's.
    #[arg(long)]
    pub out_dtype: Option<String>,

    #[arg(long)]
    pub transpose_lhs: bool,

    #[arg(long)]
    pub transpose_rhs: bool,

    /// Cube math type; defaults to the configured one.
    #[arg(long)]
    pub math: Option<String>,

    /// Hardware generation; overrides the configuration.
    #[arg(long)]
    pub soc: Option<String>,

    /// Plan with the batched operators.
    #[arg(long)]
    pub batched: bool,
}

/// Parsed operands of one call.
pub struct CallSpec {
    pub lhs: TensorDesc,
    pub rhs: TensorDesc,
    pub bias: Option<TensorDesc>,
    pub out_dtype: DType,
}

impl CallArgs {
    /// Applies `--soc` and `--math` on top of the loaded configuration.
    pub fn apply(&self, mut config: DispatchConfig) -> DispatchConfig {
        if let Some(soc) = &self.soc {
            config.soc = soc.clone();
        }
        if let Some(math) = &self.math {
            config.math_type = math.clone();
        }
        config
    }

    pub fn spec(&self) -> anyhow::Result<CallSpec> {
        let lhs_dtype: DType = self.dtype.parse()?;
        let rhs_dtype: DType = match &self.rhs_dtype {
            Some(d) => d.parse()?,
            None => lhs_dtype,
        };
        let out_dtype: DType = match &self.out_dtype {
            Some(d) => d.parse()?,
            None => lhs_dtype,
        };
        let desc = |dims: &str, dtype: DType| -> anyhow::Result<TensorDesc> {
            Ok(TensorDesc::contiguous(parse_dims(dims)?, dtype, Layout::RowMajor))
        };
        let bias = match &self.bias {
            Some(dims) => Some(desc(dims, out_dtype)?),
            None => None,
        };
        Ok(CallSpec {
            lhs: desc(&self.lhs, lhs_dtype)?,
            rhs: desc(&self.rhs, rhs_dtype)?,
            bias,
            out_dtype,
        })
    }

    pub fn operator(&self) -> OperatorKind {
        match (self.batched, self.bias.is_some()) {
            (false, false) => OperatorKind::Mm,
            (false, true) => OperatorKind::Addmm,
            (true, false) => OperatorKind::Bmm,
            (true, true) => OperatorKind::Baddbmm,
        }
    }

    pub fn job(&self, spec: &CallSpec, math: CubeMathType) -> PlanJob {
        let mut job = PlanJob::new(self.operator(), spec.lhs.clone(), spec.rhs.clone())
            .with_out_dtype(spec.out_dtype)
            .transposed(self.transpose_lhs, self.transpose_rhs)
            .with_math(math);
        if let Some(bias) = &spec.bias {
            job = job.with_bias(bias.clone());
        }
        job
    }
}

/// Parses "2,3,16" into a shape. An empty string is a scalar.
pub fn parse_dims(s: &str) -> anyhow::Result<Shape> {
    let dims = s
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| {
            d.parse::<usize>()
                .map_err(|e| anyhow::anyhow!("invalid dimension '{d}' in '{s}': {e}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Shape::new(dims))
}
