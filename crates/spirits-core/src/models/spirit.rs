//! The `Spirit` record and its derivation from a raw catalog row.
//!
//! Raw rows carry compact encodings (`s:Tiphareth:Tiferet;q:...`, `elDMG`
//! letter strings, `!ffcc00` themes); everything is expanded once here so
//! stored records are ready to display.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::csv::RawRecord;
use crate::store::{DatabaseSchema, IndexDefinition};
use crate::sync::CatalogRecord;

pub const DATABASE_NAME: &str = "DAL_Spirits";
pub const DATABASE_VERSION: u64 = 1;

/// Series of characters without an explicit `series` column.
pub const DEFAULT_SERIES: &str = "Date A Live";
pub const NEPTUNIA: &str = "Neptunia";

const GAME_ICONS: &str = "https://raw.githubusercontent.com/n0k0m3/DateALiveData/master/res/basic/icon/";
const DAL_WIKI_IMAGES: &str = "https://static.wikia.nocookie.net/date-a-live/images/";
const NEPTUNIA_WIKI_IMAGES: &str = "https://static.wikia.nocookie.net/neptunia/images/";
const NEPTUNIA_WIKI: &str = "https://neptunia.fandom.com/wiki/";
const WIKIPEDIA: &str = "https://wikipedia.org/wiki/";
const NAMES_OF_GOD: &str = "https://en.wikipedia.org/wiki/Names_of_God_in_Judaism";

pub const LORE_STAT_LABELS: [&str; 5] = ["STR", "CST", "SPI", "AGI", "INT"];
pub const SP_STAT_LABELS: [&str; 6] = ["ATK", "CMB", "SUP", "DEF", "CTR", "DPS"];

/// Schema of the persistent catalog database.
pub fn catalog_schema() -> DatabaseSchema {
    DatabaseSchema::new(DATABASE_NAME, DATABASE_VERSION)
        .with_index(IndexDefinition::new("series", "series"))
        .with_index(IndexDefinition::new("firstname", "firstname"))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid theme colour: {0}")]
    InvalidTheme(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Female,
    Male,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    pub name: String,
    /// `name` with every non-word character removed, used in routes.
    pub url: String,
}

impl Form {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            url: name
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect(),
        }
    }

    pub fn is_wizard(&self) -> bool {
        self.name.contains("Wizard")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodenameWording {
    Codename,
    GoddessTitle,
}

impl CodenameWording {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodenameWording::Codename => "Codename",
            CodenameWording::GoddessTitle => "Goddess Title",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codename {
    pub wording: CodenameWording,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Images {
    pub menu_icon: Option<String>,
    pub fullbody_image: Option<String>,
    pub sephira_character: Option<String>,
    pub sephira_icon: Option<String>,
}

impl Images {
    fn urls(&self) -> impl Iterator<Item = &String> {
        [
            &self.menu_icon,
            &self.fullbody_image,
            &self.sephira_character,
            &self.sephira_icon,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SephiraWording {
    Sephira,
    Qlipha,
    Land,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AngelWording {
    Angel,
    Weapon,
    Demon,
    UnsignedAngel,
    EsperPower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AstralDressWording {
    AstralDress,
    CrUnit,
}

/// Sephira, angel or astral dress entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerInfo<W> {
    pub wording: W,
    pub name: String,
    pub subtitle: Option<String>,
    pub link: Option<String>,
}

pub type Sephira = PowerInfo<SephiraWording>;
pub type Angel = PowerInfo<AngelWording>;
pub type AstralDress = PowerInfo<AstralDressWording>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalInfo {
    pub birthday: Option<String>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub bust: Option<f64>,
    pub waist: Option<f64>,
    pub hips: Option<f64>,
}

impl PersonalInfo {
    /// `B·W·H` when all three measurements are known.
    pub fn measurements(&self) -> Option<String> {
        match (self.bust, self.waist, self.hips) {
            (Some(b), Some(w), Some(h)) => Some(format!("{}·{}·{}", b, w, h)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoreStats {
    pub class: Option<String>,
    /// Values in [`LORE_STAT_LABELS`] order.
    pub values: [Option<f64>; 5],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Element {
    Physical,
    Fire,
    Frost,
    Spiritual,
    Lightning,
    Tempest,
    Magic,
    Holy,
    Dark,
    Space,
}

impl Element {
    fn from_code(code: char) -> Self {
        match code {
            'v' => Element::Space,
            's' => Element::Spiritual,
            'm' => Element::Magic,
            'f' => Element::Fire,
            'l' => Element::Lightning,
            't' => Element::Tempest,
            'i' => Element::Frost,
            'h' => Element::Holy,
            'd' => Element::Dark,
            _ => Element::Physical,
        }
    }

    /// Number of the in-game element icon; Space and Spiritual have none.
    fn icon_id(&self) -> Option<u8> {
        match self {
            Element::Magic => Some(1),
            Element::Fire => Some(2),
            Element::Lightning => Some(3),
            Element::Tempest => Some(4),
            Element::Physical => Some(5),
            Element::Frost => Some(6),
            Element::Holy => Some(7),
            Element::Dark => Some(8),
            Element::Space | Element::Spiritual => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementalDamage {
    pub label: Element,
    pub icon: Option<String>,
}

impl ElementalDamage {
    fn new(label: Element) -> Self {
        Self {
            label,
            icon: label
                .icon_id()
                .map(|id| format!("{}element/{}.png", GAME_ICONS, id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpStats {
    pub rank: Option<String>,
    /// Values in [`SP_STAT_LABELS`] order.
    pub values: [Option<f64>; 6],
    pub el_dmg: Vec<ElementalDamage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    /// Hex colour without `#`.
    pub main: String,
    pub dark_contrast: bool,
}

impl Theme {
    fn parse(raw: &str) -> Result<Self, ModelError> {
        let (dark_contrast, main) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        if main.is_empty() || !main.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ModelError::InvalidTheme(raw.to_string()));
        }
        Ok(Self {
            main: main.to_string(),
            dark_contrast,
        })
    }
}

/// One form of one character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spirit {
    pub series: String,
    pub firstname: String,
    pub lastname: Option<String>,
    pub gender: Gender,
    pub form: Form,
    pub codename: Option<Codename>,
    pub images: Images,
    pub sephiras: Vec<Sephira>,
    pub angels: Vec<Angel>,
    pub astral_dresses: Vec<AstralDress>,
    pub personal_info: PersonalInfo,
    pub lore_stats: Option<LoreStats>,
    pub sp_stats: Option<SpStats>,
    pub theme: Theme,
    pub spoiler: bool,
}

impl Spirit {
    /// Build a spirit from one decoded catalog row.
    pub fn from_raw(raw: &RawRecord) -> Result<Self, ModelError> {
        let series = text(raw, "series").unwrap_or_else(|| DEFAULT_SERIES.to_string());
        let firstname = text(raw, "firstname").ok_or(ModelError::MissingField("firstname"))?;
        let form = Form::new(&text(raw, "form").ok_or(ModelError::MissingField("form"))?);
        let theme = Theme::parse(&text(raw, "theme").ok_or(ModelError::MissingField("theme"))?)?;
        let gender = match text(raw, "gender").as_deref() {
            Some("male") => Gender::Male,
            _ => Gender::Female,
        };

        let codename = text(raw, "codename").map(|value| Codename {
            wording: if series == NEPTUNIA {
                CodenameWording::GoddessTitle
            } else {
                CodenameWording::Codename
            },
            value,
        });

        let icon_id = text(raw, "icon_id");
        let mut images = Images {
            menu_icon: icon_id
                .as_ref()
                .map(|id| format!("{}hero/face/{}.png", GAME_ICONS, id)),
            fullbody_image: match text(raw, "image_id") {
                Some(id) if id.chars().all(|c| c.is_ascii_digit()) => {
                    Some(format!("{}teampic/{}.png", GAME_ICONS, id))
                }
                Some(id) => Some(format!("{}{}.png", DAL_WIKI_IMAGES, id)),
                None => icon_id.map(|id| format!("{}teampic/{}.png", GAME_ICONS, id)),
            },
            ..Images::default()
        };

        let sephiras = parse_sephiras(
            text(raw, "sephiras").as_deref(),
            &split_list(text(raw, "sephira_subtitles").as_deref()),
            &mut images,
        );
        let angels = parse_angels(
            text(raw, "angels").as_deref(),
            &split_list(text(raw, "angel_subtitles").as_deref()),
        );
        let astral_dresses = parse_astral_dresses(text(raw, "astraldress").as_deref(), &form);

        let female = gender == Gender::Female;
        let personal_info = PersonalInfo {
            birthday: text(raw, "birthday"),
            height: number(raw, "height"),
            weight: number(raw, "weight"),
            bust: number(raw, "B").filter(|_| female),
            waist: number(raw, "W").filter(|_| female),
            hips: number(raw, "H").filter(|_| female),
        };

        let class = text(raw, "class");
        let lore_values = LORE_STAT_LABELS.map(|label| number(raw, label));
        let lore_stats = (series == DEFAULT_SERIES
            && (all_truthy(&lore_values) || class.is_some()))
        .then(|| LoreStats {
            class,
            values: lore_values,
        });

        let rank = text(raw, "rank");
        let el_dmg = text(raw, "elDMG");
        let sp_values = SP_STAT_LABELS.map(|label| number(raw, label));
        let sp_stats = (all_truthy(&sp_values) || (rank.is_some() && el_dmg.is_some())).then(|| {
            SpStats {
                rank,
                values: sp_values,
                el_dmg: el_dmg
                    .map(|codes| {
                        codes
                            .chars()
                            .map(|c| ElementalDamage::new(Element::from_code(c)))
                            .collect()
                    })
                    .unwrap_or_default(),
            }
        });

        Ok(Self {
            spoiler: raw.get("spoiler").and_then(Value::as_bool).unwrap_or(false),
            series,
            firstname,
            lastname: text(raw, "lastname"),
            gender,
            form,
            codename,
            images,
            sephiras,
            angels,
            astral_dresses,
            personal_info,
            lore_stats,
            sp_stats,
            theme,
        })
    }

    /// Every image URL the record references, in display order.
    pub fn all_images(&self) -> Vec<String> {
        let el_icons = self
            .sp_stats
            .iter()
            .flat_map(|stats| stats.el_dmg.iter().filter_map(|el| el.icon.as_ref()));
        self.images.urls().chain(el_icons).cloned().collect()
    }

    pub fn full_name(&self) -> String {
        match &self.lastname {
            Some(lastname) => format!("{} {}", self.firstname, lastname),
            None => self.firstname.clone(),
        }
    }

    /// Menu route of this form, `#spirits/<firstname>/<form url>`.
    pub fn href(&self) -> String {
        format!("#spirits/{}/{}", self.firstname, self.form.url)
    }

    pub fn main_sephira(&self) -> Option<&Sephira> {
        self.sephiras.first()
    }

    pub fn main_angel(&self) -> Option<&Angel> {
        self.angels.first()
    }

    pub fn is_collaboration(&self) -> bool {
        self.series != DEFAULT_SERIES
    }
}

impl CatalogRecord for Spirit {
    type Error = ModelError;

    fn from_raw(raw: &RawRecord) -> Result<Self, ModelError> {
        Spirit::from_raw(raw)
    }

    fn image_urls(&self) -> Vec<String> {
        self.all_images()
    }
}

/// Field as text; numbers are printed back the way they were written.
fn text(raw: &RawRecord, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(raw: &RawRecord, key: &str) -> Option<f64> {
    raw.get(key).and_then(Value::as_f64)
}

/// Zero counts as absent, as it does for the stat sheets.
fn all_truthy(values: &[Option<f64>]) -> bool {
    values.iter().all(|v| matches!(v, Some(n) if *n != 0.0))
}

fn split_list(list: Option<&str>) -> Vec<String> {
    list.map(|l| l.split(';').map(str::to_string).collect())
        .unwrap_or_default()
}

fn portrait(id: &str) -> String {
    format!("{}battleDialog/btlPortrait_{}.png", GAME_ICONS, id)
}

fn wikipedia(article: &str) -> String {
    format!("{}{}", WIKIPEDIA, article)
}

/// Entries look like `s:<name>[:<article>]`, `q:<name>:<sephira>[:<article>]`
/// or `l:<land>:<logo path>`. The first entry decides the sephira images.
fn parse_sephiras(list: Option<&str>, subtitles: &[String], images: &mut Images) -> Vec<Sephira> {
    let Some(list) = list else {
        return Vec::new();
    };

    list.split(';')
        .enumerate()
        .map(|(i, entry)| {
            let info: Vec<&str> = entry.split(':').collect();
            let part = |n: usize| info.get(n).copied().unwrap_or_default();
            let subtitle = subtitles.get(i).cloned();

            match part(0) {
                "l" => {
                    let land = part(1);
                    images.sephira_character.get_or_insert_with(|| {
                        portrait(match land {
                            "Lowee" => "40216_a1",
                            "Lastation" => "40220_weixiao",
                            "Leanbox" => "40218_daiji",
                            _ => "40214_b1",
                        })
                    });
                    images.sephira_icon.get_or_insert_with(|| {
                        format!("{}{}/{}_Logo.png", NEPTUNIA_WIKI_IMAGES, part(2), land)
                    });
                    Sephira {
                        wording: SephiraWording::Land,
                        name: land.to_string(),
                        subtitle,
                        link: Some(format!("{}{}", NEPTUNIA_WIKI, land)),
                    }
                }
                "q" => {
                    let sephira = part(2);
                    if images.sephira_character.is_none() {
                        let id = match sephira {
                            "Kether" => Some("40201_a1"),
                            "Chokhmah" => Some("40202_a1"),
                            "Binah" => Some("40203_a1"),
                            "Chesed" => Some("40209_c1"),
                            "Geburah" => Some("31001L_d1"),
                            "Tiphareth" => Some("31101L_a1"),
                            _ => None,
                        };
                        images.sephira_character = id.map(portrait);
                    }
                    images
                        .sephira_icon
                        .get_or_insert_with(|| format!("{}equipType/{}.png", GAME_ICONS, sephira));
                    Sephira {
                        wording: SephiraWording::Qlipha,
                        name: part(1).to_string(),
                        subtitle,
                        link: Some(wikipedia(info.get(3).copied().unwrap_or(part(1)))),
                    }
                }
                _ => {
                    let name = part(1);
                    if images.sephira_character.is_none() {
                        let id = match name {
                            "Chesed" => Some("40210_D1"),
                            "Geburah" => Some("40105_weixiao"),
                            "Tiphareth" => Some("40106_weixiao"),
                            _ => None,
                        };
                        images.sephira_character = id.map(portrait);
                    }
                    images
                        .sephira_icon
                        .get_or_insert_with(|| format!("{}equipType/{}.png", GAME_ICONS, name));
                    Sephira {
                        wording: SephiraWording::Sephira,
                        name: name.to_string(),
                        subtitle,
                        link: Some(wikipedia(info.get(2).copied().unwrap_or(name))),
                    }
                }
            }
        })
        .collect()
}

/// Entries look like `<kind>:<name>[:<article>]`.
fn parse_angels(list: Option<&str>, subtitles: &[String]) -> Vec<Angel> {
    let Some(list) = list else {
        return Vec::new();
    };

    list.split(';')
        .enumerate()
        .map(|(i, entry)| {
            let info: Vec<&str> = entry.split(':').collect();
            let kind = info.first().copied().unwrap_or_default();
            let name = info.get(1).copied().unwrap_or_default();
            let subtitle = subtitles.get(i).cloned();

            let (wording, link) = match kind {
                "w" => (AngelWording::Weapon, None),
                "u" => (AngelWording::UnsignedAngel, None),
                "e" => (AngelWording::EsperPower, None),
                "a" => (AngelWording::Angel, Some(info.get(2).copied().unwrap_or(name))),
                _ => (AngelWording::Demon, Some(info.get(2).copied().unwrap_or(name))),
            };
            Angel {
                wording,
                name: name.to_string(),
                subtitle,
                link: link.map(wikipedia),
            }
        })
        .collect()
}

/// Entries look like `ad:<name>:<divine name>` or `cr:<name>`.
fn parse_astral_dresses(list: Option<&str>, form: &Form) -> Vec<AstralDress> {
    let Some(list) = list else {
        return Vec::new();
    };

    list.split(';')
        .map(|entry| {
            let info: Vec<&str> = entry.split(':').collect();
            let name = info.get(1).copied().unwrap_or_default().to_string();

            if info.first() == Some(&"cr") {
                return AstralDress {
                    wording: AstralDressWording::CrUnit,
                    name,
                    subtitle: None,
                    link: None,
                };
            }

            let divine = info.get(2).copied().unwrap_or_default();
            let subtitle = match form.name.as_str() {
                "Pseudo-Spirit" => format!("Incantation Spirit Dress, {}", divine),
                "Quasi-Spirit" => format!("Stranded Spirit Dress, {}", divine),
                _ => format!("Spirit Dress of God's Authority, {}", divine),
            };
            AstralDress {
                wording: AstralDressWording::AstralDress,
                name,
                subtitle: Some(subtitle),
                link: (form.name != "Quasi-Spirit").then(|| NAMES_OF_GOD.to_string()),
            }
        })
        .collect()
}
