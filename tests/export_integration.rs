//! Card export integration tests.
//!
//! Exercises SVG export, the plain-text fallback and the manual-capture
//! last resort against temporary directories.

use std::fs;
use tempfile::TempDir;

use wishcake::card::{export_card, Card, CardTheme, ExportOutcome, MANUAL_CAPTURE_MESSAGE};
use wishcake::wish::BirthdayWish;

fn test_wish() -> BirthdayWish {
    BirthdayWish {
        title: "Happy Birthday Arjun".to_string(),
        message: "Saal bhar khushiyan milti rahein.".to_string(),
        poem: "Candles glow\nFriends all cheer\nCake is here\nBest day of the year".to_string(),
        short_quote: "Keep shining".to_string(),
        fun_fact: "Legend says balloons float higher near you".to_string(),
    }
}

// =============================================================================
// SVG Export Tests
// =============================================================================

#[test]
fn test_export_writes_svg_without_controls() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let card = Card::new(&test_wish(), "data:image/png;base64,iVBORw0KGgo=");
    let target = temp_dir.path().join(card.file_stem());

    let outcome = export_card(&card, &target);
    let svg_path = temp_dir.path().join("Birthday_Card_Happy_Birthday_Arjun.svg");
    assert_eq!(outcome, ExportOutcome::Svg(svg_path.clone()));

    let content = fs::read_to_string(&svg_path).expect("Failed to read SVG");
    assert!(content.starts_with("<svg"));
    assert!(content.contains("Happy Birthday Arjun"));
    assert!(content.contains("data:image/png;base64,iVBORw0KGgo="));
    assert!(!content.contains("Download Card"));
    assert!(!content.contains("Naya Wish"));
}

#[test]
fn test_text_header_when_no_image() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let card = Card::new(&test_wish(), "").with_theme(CardTheme::Vintage);

    let outcome = export_card(&card, &temp_dir.path().join("card"));
    let ExportOutcome::Svg(path) = outcome else {
        panic!("expected svg export, got {outcome:?}");
    };
    let content = fs::read_to_string(path).expect("Failed to read SVG");
    assert!(content.contains("Happy Birthday!"));
    assert!(content.contains("#fdf6e3"));
    assert!(!content.contains("<image"));
}

// =============================================================================
// Fallback Tests
// =============================================================================

#[test]
fn test_corrupt_image_falls_back_to_text() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let card = Card::new(&test_wish(), "data:image/png;base64,%%%");

    let outcome = export_card(&card, &temp_dir.path().join("card.svg"));
    let text_path = temp_dir.path().join("card.txt");
    assert_eq!(outcome, ExportOutcome::Fallback(text_path.clone()));
    assert!(!temp_dir.path().join("card.svg").exists());

    let content = fs::read_to_string(text_path).expect("Failed to read fallback");
    assert!(content.contains("Saal bhar khushiyan milti rahein."));
    assert!(content.contains("Secret Legend"));
    assert!(!content.contains("Download Card"));
}

#[test]
fn test_unwritable_target_asks_for_screenshot() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let card = Card::new(&test_wish(), "");
    let target = temp_dir.path().join("missing").join("nested").join("card");

    let outcome = export_card(&card, &target);
    assert_eq!(
        outcome,
        ExportOutcome::ManualCapture(MANUAL_CAPTURE_MESSAGE.to_string())
    );
}
