// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `mmd plan` command: show the plan and backend for one call.

use dispatch_runtime::{DispatchConfig, DispatchEngine};

use super::CallArgs;

pub async fn execute(config: DispatchConfig, call: CallArgs, json: bool) -> anyhow::Result<()> {
    let engine = DispatchEngine::new(call.apply(config)).configure()?.prepare();
    let spec = call.spec()?;
    let job = call.job(&spec, engine.default_math());

    // Plan on the blocking pool like any batch of independent jobs.
    let planned = engine
        .plan_many(vec![job])
        .await
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("planner returned no result"))??;

    if json {
        println!("{}", serde_json::to_string_pretty(&planned)?);
        return Ok(());
    }

    let plan = &planned.plan;
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║                mmd · Matmul Planner                  ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
    println!("  Call:");
    println!("   Operator:  {}", call.operator());
    println!("   Platform:  {} ({} cube cores)", engine.platform().soc, engine.platform().cube_core_count);
    println!("   Oracle:    {}", engine.oracle().name());
    println!("   LHS:       {} {}{}", spec.lhs.shape(), spec.lhs.dtype(), flag(call.transpose_lhs));
    println!("   RHS:       {} {}{}", spec.rhs.shape(), spec.rhs.dtype(), flag(call.transpose_rhs));
    if let Some(bias) = &spec.bias {
        println!("   Bias:      {} {}", bias.shape(), bias.dtype());
    }
    println!();

    println!("  Plan:");
    println!("   {}", plan.summary());
    println!("   Layouts:   lhs {} / rhs {}", plan.lhs.layout, plan.rhs.layout);
    println!("   Output:    {} {}", plan.out.shape, plan.out.dtype);
    for warning in &plan.warnings {
        println!("   Warning:   {warning}");
    }
    println!();
    println!("  Backend: {}{}", planned.backend, if planned.backend.is_v3() { "  (V3)" } else { "" });
    println!();
    Ok(())
}

fn flag(transposed: bool) -> &'static str {
    if transposed {
        "  (transposed)"
    } else {
        ""
    }
}
