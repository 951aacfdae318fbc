use std::path::PathBuf;

use anyhow::Context;
use rune_sync::LocalStore;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <path-to-review-store> [user-id]", args[0]);
        eprintln!("\nExample: {} ./reviews.db alice", args[0]);
        std::process::exit(1);
    }

    let path = PathBuf::from(&args[1]);
    if !path.exists() {
        eprintln!("Error: File '{}' does not exist", path.display());
        std::process::exit(1);
    }

    let store = LocalStore::read_only(path.clone());
    store
        .initialize()
        .await
        .with_context(|| format!("Failed to open '{}'", path.display()))?;

    println!("RuneScope - Offline Review Store Inspector");
    println!("==========================================");
    println!("File: {}", path.display());
    println!();

    let Some(user_id) = args.get(2) else {
        println!("Pending outcomes per user:");
        println!("--------------------------");
        let counts = store.pending_counts_by_user().await?;
        if counts.is_empty() {
            println!("  Queue is empty");
        }
        for (user_id, count) in &counts {
            println!("  {user_id}: {count}");
        }
        return Ok(());
    };

    println!("Pending outcomes for {user_id}:");
    println!("------------------------------");
    let pending = store.list_pending_outcomes(user_id).await?;
    if pending.is_empty() {
        println!("  None");
    }
    for outcome in &pending {
        println!(
            "  #{:<6} {}  {:<24} {}",
            outcome.id,
            outcome.timestamp.to_rfc3339(),
            outcome.item_id,
            if outcome.is_correct { "correct" } else { "incorrect" }
        );
    }

    println!();
    println!("Cached review set:");
    println!("------------------");
    let cached = store.get_cached_review_set(user_id).await?;
    match store.cached_review_set_written_at(user_id).await? {
        Some(written_at) => println!("  Written at: {}", written_at.to_rfc3339()),
        None => println!("  Empty"),
    }
    for record in &cached {
        let due = record
            .next_review_date
            .map(|date| date.to_rfc3339())
            .unwrap_or_else(|| "unscheduled".to_string());
        println!(
            "  {:<24} {:<10} {:>4} ok {:>4} failed  due {}  {}",
            record.item_id,
            record.mastery_level.label(),
            record.successful_casts,
            record.failed_casts,
            due,
            record.display_word.as_deref().unwrap_or("")
        );
    }

    Ok(())
}
