// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic token-tiers usage example.
//!
//! Demonstrates:
//! 1. Building the tiers (in-memory by default, real backends via env)
//! 2. Issuing tokens with metadata
//! 3. Looking them up through L1 → L2 → L3
//! 4. Running a sweep and listing a user's tokens
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//!
//! # Against real backends
//! REDIS_URL=redis://localhost:6379 DATABASE_URL="sqlite:tokens.db?mode=rwc" \
//!     cargo run --example basic_usage
//! ```

use std::sync::Arc;
use serde_json::json;
use token_tiers::{
    ArchiveStore, CacheStore, MemoryArchiveStore, MemoryCacheStore, Metadata, RedisStore,
    SqlStore, TierConfig, TokenTiers,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything for the dump below)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,token_tiers=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║            token-tiers: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Build the tiers
    // ─────────────────────────────────────────────────────────────────────────
    let config = TierConfig {
        l3_horizon_secs: 30 * 24 * 3600,
        ..Default::default()
    };

    let cache: Arc<dyn CacheStore> = match std::env::var("REDIS_URL") {
        Ok(url) => {
            println!("📦 L2: Redis at {}", url);
            Arc::new(RedisStore::connect(&url, config.l2_ttl_secs, Some("tok:")).await?)
        }
        Err(_) => {
            println!("📦 L2: in-memory");
            Arc::new(MemoryCacheStore::new(std::time::Duration::from_secs(config.l2_ttl_secs)))
        }
    };
    let archive: Arc<dyn ArchiveStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            println!("📦 L3: SQL at {}", url);
            Arc::new(SqlStore::connect(&url, None).await?)
        }
        Err(_) => {
            println!("📦 L3: in-memory");
            Arc::new(MemoryArchiveStore::new())
        }
    };

    let (tiers, mut errors) = TokenTiers::initialize(archive, cache, config)?;
    tiers.start()?;
    tokio::spawn(async move {
        while let Some(e) = errors.recv().await {
            eprintln!("   ⚠️  background: {}", e);
        }
    });
    println!(
        "   └─ L1 live {}s, L2 TTL {}s, L3 horizon {}s",
        tiers.config().l1_live_secs,
        tiers.config().l2_ttl_secs,
        tiers.config().l3_horizon_secs
    );
    println!("   └─ State: {}\n", tiers.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Issue tokens
    // ─────────────────────────────────────────────────────────────────────────
    println!("🔑 Issuing tokens...");
    let mut issued = Vec::new();
    for device in ["ios", "android", "web"] {
        let mut meta = Metadata::new();
        meta.insert("device".into(), json!(device));
        let t = tiers.make_token(2, meta).await?;
        println!("   └─ {} → {} (cached: {})", device, t.token, t.is_cached());
        issued.push(t);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Look them up
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔍 Looking up...");
    for t in &issued {
        println!("   └─ {} → userid {}", t.token, tiers.get_user_id(&t.token).await?);
    }

    // Drop L1 so the next read is served by a slower tier and promoted
    tiers.l1().clear();
    let first = &issued[0].token;
    println!("   └─ after L1 clear: {} → userid {}", first, tiers.get_user_id(first).await?);
    println!("   └─ unknown token → userid {}", tiers.get_user_id("no-such-token").await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Maintenance and enumeration
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🧹 Running an L1 sweep...");
    let report = tiers.run_l1_sweep().await;
    println!(
        "   └─ evicted={} flushed={} errors={}",
        report.evicted, report.flushed, report.errors
    );

    println!("\n📋 Tokens for user 2:");
    for record in tiers.get_user_tokens(2).await? {
        println!("   └─ {} {:?}", record.token, record.metadata);
    }

    tiers.del_token(first).await?;
    println!("\n🗑️  Deleted {} → userid {}", first, tiers.get_user_id(first).await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    tiers.shutdown().await;
    println!("\n   └─ State: {}", tiers.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut lines: Vec<String> = Vec::new();
    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => format!("{}", v),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={} sum={:.4}", samples.len(), sum)
            }
        };
        lines.push(format!("{}{} = {}", key.name(), label_str, rendered));
    }

    lines.sort();
    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {}", line);
    }
}
