//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static STOP: Emoji<'_, '_> = Emoji("⛔ ", "[X]");

// Queue indicators
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static BLOCKER: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCK]");
pub static RETRY: Emoji<'_, '_> = Emoji("🔄 ", "[RETRY]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");

// Story indicators
pub static BRANCH: Emoji<'_, '_> = Emoji("🌿 ", "-");
pub static TAG: Emoji<'_, '_> = Emoji("🏷️  ", "#");
