//! Text and JSON rendering of catalog data.

use std::path::Path;

use anyhow::Result;
use serde_json::json;
use spirits_core::models::{
    MenuSection, PowerInfo, Spirit, LORE_STAT_LABELS, SP_STAT_LABELS,
};
use spirits_core::{DataStrategy, SyncOutcome, SyncReport};

pub fn print_menu(menu: &[MenuSection], as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(menu)?);
        return Ok(());
    }

    if menu.is_empty() {
        println!("The catalog is empty.");
    }
    for section in menu {
        println!("{}", section.series);
        for character in &section.characters {
            let mut flags = Vec::new();
            if character.wizard {
                flags.push("wizard");
            }
            if character.spoiler {
                flags.push("spoiler");
            }
            if flags.is_empty() {
                println!("  {}", character.full_name);
            } else {
                println!("  {} [{}]", character.full_name, flags.join(", "));
            }
            for form in &character.forms {
                let icon = if form.icon_cached { "*" } else { " " };
                let spoiler = if form.spoiler { " (spoiler)" } else { "" };
                println!("    {} {:<24} {}{}", icon, form.name, form.href, spoiler);
            }
        }
    }
    Ok(())
}

pub fn print_series(series: &str, spirits: &[Spirit], as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(spirits)?);
        return Ok(());
    }

    if spirits.is_empty() {
        println!("No characters stored for {}.", series);
        return Ok(());
    }
    println!("{} ({} forms)", series, spirits.len());
    for spirit in spirits {
        println!("  {:<28} {}", spirit.full_name(), spirit.form.name);
    }
    Ok(())
}

pub async fn print_spirit(
    store: &dyn DataStrategy<Spirit>,
    spirit: &Spirit,
    as_json: bool,
) -> Result<()> {
    let mut images = Vec::new();
    for (label, url) in [
        ("Menu icon", &spirit.images.menu_icon),
        ("Full body", &spirit.images.fullbody_image),
        ("Sephira character", &spirit.images.sephira_character),
        ("Sephira icon", &spirit.images.sephira_icon),
    ] {
        if let Some(url) = url {
            let blob = store.get_blob(url).await?;
            images.push((label, url.as_str(), blob.map(|b| b.bytes.len())));
        }
    }

    if as_json {
        let images: Vec<_> = images
            .iter()
            .map(|(label, url, size)| json!({"label": label, "url": url, "cached_bytes": size}))
            .collect();
        let value = json!({"spirit": spirit, "images": images});
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{} ({})", spirit.full_name(), spirit.form.name);
    println!("  Series: {}", spirit.series);
    if let Some(codename) = &spirit.codename {
        println!("  {}: {}", codename.wording.as_str(), codename.value);
    }
    if spirit.spoiler {
        println!("  Spoiler");
    }

    for sephira in &spirit.sephiras {
        print_power("Sephira", &format!("{:?}", sephira.wording), sephira);
    }
    for angel in &spirit.angels {
        print_power("Angel", &format!("{:?}", angel.wording), angel);
    }
    for dress in &spirit.astral_dresses {
        print_power("Dress", &format!("{:?}", dress.wording), dress);
    }

    let info = &spirit.personal_info;
    println!(
        "  Birthday: {}",
        info.birthday
            .as_deref()
            .map(|b| format!("{}{}", b, ordinal_suffix(b)))
            .unwrap_or_else(|| "Unknown".to_string())
    );
    println!("  Height: {}", known(info.height, "cm"));
    println!("  Weight: {}", known(info.weight, "kg"));
    println!(
        "  B·W·H: {}",
        info.measurements().unwrap_or_else(|| "Unknown".to_string())
    );

    if let Some(stats) = &spirit.lore_stats {
        println!("  Lore: {}", stat_line(&LORE_STAT_LABELS, &stats.values));
        if let Some(class) = &stats.class {
            println!("  Class: {}", class);
        }
    }
    if let Some(stats) = &spirit.sp_stats {
        println!("  Spirit Pledge: {}", stat_line(&SP_STAT_LABELS, &stats.values));
        if let Some(rank) = &stats.rank {
            println!("  Rank: {}", rank);
        }
        if !stats.el_dmg.is_empty() {
            let elements: Vec<String> = stats.el_dmg.iter().map(|e| format!("{:?}", e.label)).collect();
            println!("  Elements: {}", elements.join(", "));
        }
    }

    let contrast = if spirit.theme.dark_contrast { " (dark contrast)" } else { "" };
    println!("  Theme: #{}{}", spirit.theme.main, contrast);

    for (label, url, size) in images {
        match size {
            Some(size) => println!("  {}: cached, {} bytes ({})", label, size, url),
            None => println!("  {}: not cached ({})", label, url),
        }
    }
    Ok(())
}

pub fn print_sync(report: &SyncReport, as_json: bool) -> Result<()> {
    let summary = match &report.outcome {
        SyncOutcome::Created { hash } => format!("Created database with hash '{}'", hash),
        SyncOutcome::Updated { hash, previous } => {
            format!("Updated database, hash '{}' (previously '{}')", hash, previous)
        }
        SyncOutcome::Populated => "Populated in-memory database".to_string(),
        SyncOutcome::Unchanged { hash } => format!("Database already up to date ('{}')", hash),
        SyncOutcome::Offline => "Offline, using cached data".to_string(),
        SyncOutcome::SourceUnavailable { reason } => {
            format!("Data source unavailable, using cached data ({})", reason)
        }
        SyncOutcome::Skipped { reason } => {
            format!("Skipped update, using cached data ({})", reason)
        }
    };

    if as_json {
        let value = json!({
            "summary": summary,
            "imported": report.imported,
            "failed": report.failed,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", summary);
        println!("Imported {} records ({} failed)", report.imported, report.failed);
    }
    Ok(())
}

pub async fn print_status(
    store: &dyn DataStrategy<Spirit>,
    cache_dir: &Path,
    as_json: bool,
) -> Result<()> {
    let records = store.search_data(None).await?.len();
    let blobs = store.get_all_blobs().await?;
    let blob_bytes: usize = blobs.iter().map(|b| b.bytes.len()).sum();
    let import = match store.hash_slot() {
        Some(slot) => slot.load()?,
        None => None,
    };

    if as_json {
        let value = json!({
            "strategy": store.kind().as_str(),
            "cache_dir": cache_dir.display().to_string(),
            "records": records,
            "blobs": blobs.len(),
            "blob_bytes": blob_bytes,
            "hash": import.as_ref().map(|s| &s.hash),
            "imported_at": import.as_ref().map(|s| s.imported_at.to_rfc3339()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Strategy: {}", store.kind());
    println!("Cache directory: {}", cache_dir.display());
    println!("Records: {}", records);
    println!("Images: {} ({} bytes)", blobs.len(), blob_bytes);
    match import {
        Some(stored) => println!("Last import: {} (hash '{}')", stored.age_display(), stored.hash),
        None => println!("Last import: never"),
    }
    Ok(())
}

fn print_power<W>(kind: &str, wording: &str, item: &PowerInfo<W>) {
    let mut line = format!("  {} ({}): {}", kind, wording, item.name);
    if let Some(subtitle) = &item.subtitle {
        line.push_str(&format!(", {}", subtitle));
        if subtitle.ends_with(|c: char| c.is_ascii_digit()) {
            line.push_str(ordinal_suffix(subtitle));
        }
    }
    if let Some(link) = &item.link {
        line.push_str(&format!(" <{}>", link));
    }
    println!("{}", line);
}

/// Suffix for a string ending in a day or rank number.
fn ordinal_suffix(text: &str) -> &'static str {
    match text.chars().last() {
        Some('1') => "st",
        Some('2') => "nd",
        Some('3') => "rd",
        _ => "th",
    }
}

fn known(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) if v != 0.0 => format!("{}{}", v, unit),
        _ => "Unknown".to_string(),
    }
}

fn stat_line(labels: &[&str], values: &[Option<f64>]) -> String {
    labels
        .iter()
        .zip(values)
        .map(|(label, value)| match value {
            Some(v) => format!("{} {}", label, v),
            None => format!("{} ?", label),
        })
        .collect::<Vec<_>>()
        .join("  ")
}
