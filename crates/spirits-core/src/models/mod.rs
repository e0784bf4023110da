//! Data models for the character catalog.
//!
//! - `Spirit`: one form of one character, built from a catalog row
//! - `SpiritOrder`, `MenuSection`: series/character menu ordering

pub mod menu;
pub mod spirit;

pub use menu::{build_menu, MenuCharacter, MenuForm, MenuSection, SeriesOrder, SpiritOrder};
pub use spirit::{
    catalog_schema, Angel, AngelWording, AstralDress, AstralDressWording, Codename,
    CodenameWording, Element, ElementalDamage, Form, Gender, Images, LoreStats, ModelError,
    PersonalInfo, PowerInfo, Sephira, SephiraWording, SpStats, Spirit, Theme, DEFAULT_SERIES,
    LORE_STAT_LABELS, SP_STAT_LABELS,
};
