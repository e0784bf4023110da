//! Series/character menu built from stored spirits.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::spirit::Spirit;
use crate::store::{DataStrategy, Filter, StoreResult};

/// Firstnames of one series in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesOrder {
    pub series: String,
    pub firstnames: Vec<String>,
}

/// Order in which series and characters appear in the menu.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiritOrder {
    series: Vec<SeriesOrder>,
}

impl SpiritOrder {
    pub fn from_spirits<'a>(spirits: impl IntoIterator<Item = &'a Spirit>) -> Self {
        let mut order = Self::default();
        for spirit in spirits {
            order.push(&spirit.series, &spirit.firstname);
        }
        order
    }

    pub fn push(&mut self, series: &str, firstname: &str) {
        let index = match self.series.iter().position(|s| s.series == series) {
            Some(index) => index,
            None => {
                self.series.push(SeriesOrder {
                    series: series.to_string(),
                    firstnames: Vec::new(),
                });
                self.series.len() - 1
            }
        };
        let names = &mut self.series[index].firstnames;
        if !names.iter().any(|name| name == firstname) {
            names.push(firstname.to_string());
        }
    }

    pub fn series(&self) -> &[SeriesOrder] {
        &self.series
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuForm {
    pub name: String,
    pub href: String,
    pub icon: Option<String>,
    /// Whether the icon is available from the blob store.
    pub icon_cached: bool,
    pub wizard: bool,
    pub collaboration: bool,
    pub spoiler: bool,
}

/// A character entry; a flag is set only when every form carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuCharacter {
    pub firstname: String,
    pub full_name: String,
    pub forms: Vec<MenuForm>,
    pub wizard: bool,
    pub collaboration: bool,
    pub spoiler: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuSection {
    pub series: String,
    pub characters: Vec<MenuCharacter>,
}

/// Build the menu by querying each series in `order`.
pub async fn build_menu(
    store: &dyn DataStrategy<Spirit>,
    order: &SpiritOrder,
) -> StoreResult<Vec<MenuSection>> {
    let mut sections = Vec::with_capacity(order.series().len());

    for entry in order.series() {
        let spirits = store
            .search_data(Some(&Filter::new("series", entry.series.as_str())))
            .await?;

        let mut characters = Vec::new();
        for firstname in &entry.firstnames {
            let forms: Vec<&Spirit> = spirits
                .iter()
                .filter(|spirit| &spirit.firstname == firstname)
                .collect();
            let Some(first) = forms.first() else {
                warn!(series = %entry.series, firstname = %firstname, "No stored forms for character");
                continue;
            };

            let mut menu_forms = Vec::with_capacity(forms.len());
            for spirit in &forms {
                menu_forms.push(menu_form(store, spirit).await);
            }

            characters.push(MenuCharacter {
                firstname: firstname.clone(),
                full_name: first.full_name(),
                wizard: menu_forms.iter().all(|f| f.wizard),
                collaboration: menu_forms.iter().all(|f| f.collaboration),
                spoiler: menu_forms.iter().all(|f| f.spoiler),
                forms: menu_forms,
            });
        }

        sections.push(MenuSection {
            series: entry.series.clone(),
            characters,
        });
    }

    Ok(sections)
}

async fn menu_form(store: &dyn DataStrategy<Spirit>, spirit: &Spirit) -> MenuForm {
    let icon_cached = match &spirit.images.menu_icon {
        Some(url) => match store.get_blob(url).await {
            Ok(blob) => blob.is_some(),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read menu icon");
                false
            }
        },
        None => false,
    };

    MenuForm {
        name: spirit.form.name.clone(),
        href: spirit.href(),
        icon: spirit.images.menu_icon.clone(),
        icon_cached,
        wizard: spirit.form.is_wizard(),
        collaboration: spirit.is_collaboration(),
        spoiler: spirit.spoiler,
    }
}
