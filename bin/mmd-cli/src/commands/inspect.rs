// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `mmd inspect` command: print the capability table and the promotion
//! table of one generation.

use dispatch_runtime::DispatchConfig;
use matmul_planner::{promotion_rule, resolve_promotion, CubeMathType, CAPABILITIES};

pub async fn execute(mut config: DispatchConfig, soc: Option<String>) -> anyhow::Result<()> {
    if let Some(soc) = soc {
        config.soc = soc;
    }
    let platform = config.platform()?;

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║              mmd · Platform Inspector                ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Capability Table ───────────────────────────────────────
    println!(
        "  {:<14} {:>5} {:>5} {:>4} {:>6} {:>5} {:>8} {:>5} {:>5}  {:<8}",
        "Generation", "fp32", "bf16", "ND", "ND-otf", "K1mul", "NZNZ→ND", "cube", "vec", "Rule",
    );
    println!("  {}", "-".repeat(84));
    for (gen, caps) in CAPABILITIES.iter() {
        let marker = if *gen == platform.soc { "*" } else { " " };
        println!(
            " {marker}{:<14} {:>5} {:>5} {:>4} {:>6} {:>5} {:>8} {:>5} {:>5}  {:<8}",
            gen.as_str(),
            yes(caps.fp32_compute),
            yes(caps.bf16),
            yes(caps.nd_native),
            yes(caps.nd_on_the_fly_check),
            yes(caps.k_equal1_mul),
            yes(caps.nz_nz_nd_output),
            caps.default_cube_cores,
            caps.default_vector_cores,
            format!("{:?}", caps.promotion_rule),
        );
    }
    println!();

    // ── Promotion Table ────────────────────────────────────────
    let rule = promotion_rule(&platform);
    let dtypes = rule.supported_dtypes();
    println!("  Promotion on {} (rule {}):", platform.soc, rule.name());
    println!("  {:<10} {:<24} {:<10} {:<10} Notes", "Operands", "Math", "Compute", "Output");
    println!("  {}", "-".repeat(72));
    for &lhs in dtypes {
        for &rhs in dtypes {
            for math in CubeMathType::ALL {
                let pair = format!("{lhs}·{rhs}");
                if let Err(e) = rule.check_input(lhs, rhs, math) {
                    println!("  {pair:<10} {:<24} rejected: {e}", math.as_str());
                    continue;
                }
                let promotion = resolve_promotion(lhs, rhs, math, &platform);
                let notes: Vec<String> = promotion.warnings.iter().map(|w| w.to_string()).collect();
                println!(
                    "  {pair:<10} {:<24} {:<10} {:<10} {}",
                    math.as_str(),
                    promotion.compute.as_str(),
                    promotion.output.as_str(),
                    notes.join("; "),
                );
            }
        }
    }
    println!();

    Ok(())
}

fn yes(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "-"
    }
}
