// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `mmd run` command: execute one call on the host executor.
//!
//! Walks the type-state pipeline:
//! ```text
//! DispatchEngine<Idle> → configure → <Configured> → prepare → <Ready> → dispatch
//! ```
//! and compares the result with the reference matmul.

use dispatch_runtime::{DispatchConfig, DispatchEngine, DispatchOutcome};
use matmul_planner::infer_output_shape;
use op_executor::OperatorExecutor;
use tensor_core::{DType, Layout, Shape, Tensor};

use super::CallArgs;

pub async fn execute(config: DispatchConfig, call: CallArgs, beta: f64, alpha: f64) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║                 mmd · Dispatch Runner                ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Type-State Pipeline ────────────────────────────────────
    let configured = DispatchEngine::new(call.apply(config)).configure()?;
    println!("  [1/3] Configured {} with oracle '{}'", configured.platform().soc, configured.config().oracle);
    let engine = configured.prepare();
    println!("  [2/3] Host executor ready");

    let spec = call.spec()?;
    if spec.bias.is_some() && (call.transpose_lhs || call.transpose_rhs) {
        anyhow::bail!("addmm/baddbmm take untransposed operands");
    }
    let exec = engine.executor();
    let lhs_host = ramp(spec.lhs.shape().clone(), spec.lhs.dtype())?;
    let rhs_host = ramp(spec.rhs.shape().clone(), spec.rhs.dtype())?;
    let lhs = exec.upload(&lhs_host, Layout::RowMajor)?;
    let rhs = exec.upload(&rhs_host, Layout::RowMajor)?;
    let out_shape = infer_output_shape(lhs.shape(), rhs.shape(), call.transpose_lhs, call.transpose_rhs)?;
    let out = exec.alloc_tensor(&out_shape, spec.out_dtype, Layout::RowMajor)?;

    println!("  [3/3] Dispatching {} x {} → {} {}", lhs.shape(), rhs.shape(), out_shape, spec.out_dtype);
    println!();

    let product = tensor_core::matmul(&lhs_host, &rhs_host, call.transpose_lhs, call.transpose_rhs)?;
    let (outcome, expected) = match &spec.bias {
        Some(bias_desc) => {
            let bias_host = ramp(bias_desc.shape().clone(), bias_desc.dtype())?;
            let bias = exec.upload(&bias_host, Layout::RowMajor)?;
            let args = engine.addmm_args(&bias, &lhs, &rhs).scaled(beta, alpha);
            let outcome = if call.batched {
                engine.baddbmm(&args, &out)?
            } else {
                engine.addmm(&args, &out)?
            };
            let expected = tensor_core::add(
                &tensor_core::scale(&bias_host, beta as f32)?,
                &tensor_core::scale(&product, alpha as f32)?,
            )?;
            (outcome, expected)
        }
        None => {
            let args = engine
                .args(&lhs, &rhs)
                .transposed(call.transpose_lhs, call.transpose_rhs);
            (engine.matmul(&args, &out)?, product)
        }
    };

    print_outcome(&outcome);

    // ── Reference Check ────────────────────────────────────────
    let got = exec.download(&out)?.to_f32_vec();
    let want = expected.cast(spec.out_dtype).to_f32_vec();
    let max_err = got
        .iter()
        .zip(&want)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    println!("  Reference:");
    println!("   Elements:      {}", got.len());
    println!("   Max abs error: {max_err:.6}");
    println!();

    // ── Launch Log ─────────────────────────────────────────────
    println!("  Launches:");
    for (i, launch) in exec.launches().iter().enumerate() {
        let shapes: Vec<String> = launch.shapes.iter().map(|s| s.to_string()).collect();
        let mode = launch.impl_mode.map(|m| format!("  [{m}]")).unwrap_or_default();
        println!("   {:>3}. {:<28} {}{mode}", i + 1, launch.kernel, shapes.join(" · "));
    }
    println!();

    println!("  Metrics:");
    println!("   {}", engine.metrics().summary());
    println!("   {}", exec.stats().summary());
    println!();
    Ok(())
}

fn print_outcome(outcome: &DispatchOutcome) {
    println!("  Outcome:");
    if let Some(graph) = outcome.graph {
        println!("   Graph:    {graph}");
    }
    match outcome.backend {
        Some(backend) => println!("   Backend:  {backend}"),
        None => println!("   Backend:  (none)"),
    }
    if let Some(plan) = &outcome.plan {
        println!("   Plan:     {}", plan.summary());
    }
    if !outcome.rewrites.is_empty() {
        println!("   Rewrites: {:?}", outcome.rewrites);
    }
    println!();
    println!("  Stages:");
    for record in outcome.trace.records() {
        println!(
            "   {:<24} {:>8.3} ms",
            record.stage.as_str(),
            record.duration.as_secs_f64() * 1000.0
        );
    }
    println!();
}

/// Deterministic data in a small range so half types stay exact.
fn ramp(shape: Shape, dtype: DType) -> anyhow::Result<Tensor> {
    let values: Vec<f32> = (0..shape.num_elements())
        .map(|i| ((i % 9) as f32 - 4.0) * 0.125)
        .collect();
    Ok(Tensor::from_f32_as(shape, dtype, &values)?)
}
