//! Terminal output.

use chrono::{DateTime, Utc};
use facevault_client::Config;
use facevault_core::dashboard::{time_ago, whole_percent, StatsView, PLACEHOLDER};
use facevault_core::{
    DetectedFace, DeveloperSettings, RecentSearch, SearchPhase, SearchResponse, SearchResult,
    SearchStatus, SessionSnapshot,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub fn print_faces(faces: &[DetectedFace]) {
    if faces.is_empty() {
        println!("No faces detected.");
        return;
    }
    println!("{:>3}  {:<38} {:>24}  {:>6}", "#", "ID", "BOX (x, y, w, h)", "CONF");
    for (i, face) in faces.iter().enumerate() {
        let b = face.bounding_box;
        println!(
            "{:>3}  {:<38} {:>24}  {:>5.1}%",
            i + 1,
            face.id,
            format!("{:.2}, {:.2}, {:.2}, {:.2}", b.x, b.y, b.width, b.height),
            face.confidence * 100.0
        );
    }
}

/// Print each new search status until the search settles.
pub fn spawn_progress(mut rx: watch::Receiver<SessionSnapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<SearchStatus> = None;
        while rx.changed().await.is_ok() {
            let status = rx.borrow_and_update().status.clone();
            if last.as_ref() == Some(&status) || status.phase == SearchPhase::Idle {
                continue;
            }
            eprintln!("[{:>3.0}%] {}", status.progress, progress_message(&status));
            let settled = matches!(status.phase, SearchPhase::Complete | SearchPhase::Error);
            last = Some(status);
            if settled {
                break;
            }
        }
    })
}

fn progress_message(status: &SearchStatus) -> &str {
    if status.message.is_empty() {
        status.phase.label()
    } else {
        &status.message
    }
}

pub fn print_summary(response: &SearchResponse, settings: &DeveloperSettings) {
    let routing = &response.routing;
    println!();
    println!("Identity:   {}", routing.identity_id);
    println!("Routing:    {}", routing.status.label());
    if settings.show_routing_candidates {
        println!("Similarity: {:.3}", routing.similarity);
        println!("Margin:     {:.3}", routing.margin);
    }

    match &response.cluster {
        Some(cluster) => {
            println!("Centroid:   {:.3}", cluster.centroid_similarity);
            println!("Precision:  {}", whole_percent(f64::from(cluster.precision_estimate)));
            if settings.show_similarity_values {
                println!("Threshold:  {:.2}", cluster.threshold_used);
            }
            if cluster.flagged_unreliable {
                println!("Reliability: flagged unreliable");
            }
            for flag in &cluster.flags {
                println!("  ! {}", flag.replace('_', " "));
            }
        }
        None => println!("Precision:  {PLACEHOLDER}"),
    }

    if let Some((title, detail)) = routing.status.warning() {
        println!();
        println!("{title}: {detail}");
    }
}

pub fn print_results(response: &SearchResponse, settings: &DeveloperSettings, config: &Config) {
    let groups = response.grouped();
    let visible = response.visible_results(settings).len();
    println!();
    println!("{visible} matching photos");

    print_group("High confidence", &groups.high_confidence, settings, config);
    print_group("Borderline", &groups.borderline, settings, config);
    if settings.show_rejected_results {
        print_group("Rejected", &groups.rejected, settings, config);
    }
}

fn print_group(
    title: &str,
    results: &[&SearchResult],
    settings: &DeveloperSettings,
    config: &Config,
) {
    if results.is_empty() {
        return;
    }
    println!();
    println!("{title} ({})", results.len());
    for result in results {
        let url = config.photo_url(&result.photo_url);
        if settings.show_similarity_values {
            println!(
                "  {:<12} cos={:.3} centroid={:.3}  {url}",
                result.face_id, result.cosine_similarity, result.centroid_similarity
            );
        } else {
            println!("  {:<12} {url}", result.face_id);
        }
    }
}

pub fn print_recent(rows: &[RecentSearch], now: DateTime<Utc>) {
    if rows.is_empty() {
        println!("No recent searches.");
        return;
    }
    println!("{:<14} {:<10} {:>9}  {}", "TIME", "STATUS", "PRECISION", "IDENTITY");
    for row in rows {
        println!(
            "{:<14} {:<10} {:>9}  {}",
            time_ago(&row.timestamp, now),
            row.status.label(),
            whole_percent(row.precision),
            row.identity.as_deref().unwrap_or(PLACEHOLDER)
        );
    }
}

pub fn print_stats(view: &StatsView) {
    println!("Total queries:   {}", view.total_queries);
    println!("Avg precision:   {}", view.avg_precision);
    println!("Ambiguous rate:  {}", view.ambiguous_rate);
    println!("New identities:  {}", view.new_identities);
}
