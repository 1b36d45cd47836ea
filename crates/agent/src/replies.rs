use cabbot_core::domain::driver::{DriverPage, DriverRecord};
use cabbot_core::domain::session::FilterSet;
use cabbot_core::errors::ConversationError;

pub const RESET_TEXT: &str = "🔄 Reset! Tell me where you need a driver, e.g. \"I need drivers in Jaipur\".";
pub const CITY_PROMPT: &str = "Which city would you like to find drivers in?";

/// What the engine wants said back to the user after a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Drivers(DriverPage),
    /// Nothing matched; `nearby` lists alternative cities worth trying.
    NoMatch { filters: FilterSet, nearby: Vec<String> },
    NoMoreDrivers { filters: FilterSet },
    NeedMoreInfo,
    NeedCity { filters: FilterSet },
    ResetDone,
    LookupFailed(ConversationError),
    SessionRecovered,
}

impl Reply {
    pub fn is_driver_list(&self) -> bool {
        matches!(self, Self::Drivers(_))
    }

    /// Label used by the JSON chat endpoint.
    pub fn kind(&self) -> &'static str {
        if self.is_driver_list() {
            "driverList"
        } else {
            "text"
        }
    }

    pub fn text(&self) -> String {
        match self {
            Self::Drivers(page) => render_driver_page(page),
            Self::NoMatch { filters, nearby } => render_no_match(filters, nearby),
            Self::NoMoreDrivers { filters } => format!(
                "That's all the drivers I have for {}. Type 'reset' to start a new search.",
                filters.describe()
            ),
            Self::NeedMoreInfo => ConversationError::ExtractionAmbiguous.user_message().to_string(),
            Self::NeedCity { filters } if filters.is_empty() => CITY_PROMPT.to_string(),
            Self::NeedCity { filters } => {
                format!("Got it ({}). {CITY_PROMPT}", filters.describe())
            }
            Self::ResetDone => RESET_TEXT.to_string(),
            Self::LookupFailed(error) => error.user_message().to_string(),
            Self::SessionRecovered => {
                ConversationError::SessionCorrupt(String::new()).user_message().to_string()
            }
        }
    }
}

fn render_no_match(filters: &FilterSet, nearby: &[String]) -> String {
    let mut text = match filters.city.as_deref() {
        Some(city) => format!("No drivers found in {city}"),
        None => "No drivers found".to_string(),
    };
    if let Some(language) = filters.language.as_deref() {
        text.push_str(&format!(" who speak {language}"));
    }
    text.push('.');

    if !nearby.is_empty() {
        text.push_str(&format!(" Nearby cities you could try: {}.", nearby.join(", ")));
    }
    if filters.language.is_some() {
        text.push_str(" Say 'any language' to drop the language filter.");
    } else if nearby.is_empty() {
        text.push_str(" Try another city, or type 'reset' to start over.");
    }
    text
}

fn render_driver_page(page: &DriverPage) -> String {
    let filters = page.query.filters();
    let mut lines = vec![format!(
        "🚗 Found {} driver{} ({}), page {}:",
        page.drivers.len(),
        if page.drivers.len() == 1 { "" } else { "s" },
        filters.describe(),
        page.query.page
    )];

    for (index, driver) in page.drivers.iter().enumerate() {
        lines.push(String::new());
        lines.push(format!("{}. Driver Name: {}", index + 1, driver.name));
        lines.extend(driver_details(driver).into_iter().map(|detail| format!("   • {detail}")));
    }

    lines.push(String::new());
    if page.has_more {
        lines.push("Type 'more' to see more drivers, or 'reset' to start over.".to_string());
    } else {
        lines.push("Refine with a language (e.g. \"who speak Hindi\") or type 'reset'.".to_string());
    }
    lines.join("\n")
}

pub fn driver_details(driver: &DriverRecord) -> Vec<String> {
    let mut details = Vec::new();
    if let Some(city) = &driver.city {
        details.push(format!("City: {city}"));
    }
    if !driver.languages.is_empty() {
        details.push(format!("Languages: {}", driver.languages.join(", ")));
    }
    if let Some(years) = driver.experience_years {
        details.push(format!("Experience: {years} yrs"));
    }
    if let Some(vehicle) = driver.vehicles.first() {
        let mut line = format!("Vehicle: {}", vehicle.model);
        if !vehicle.vehicle_type.is_empty() {
            line.push_str(&format!(" ({})", vehicle.vehicle_type));
        }
        if let Some(cost) = driver.lowest_per_km_cost() {
            line.push_str(&format!(", from ₹{cost}/km"));
        }
        details.push(line);
    }
    if driver.pet_allowed == Some(true) {
        details.push("Pets allowed".to_string());
    }
    if let Some(phone) = &driver.phone {
        details.push(format!("Phone: 📞 {phone}"));
    }
    details
}

#[cfg(test)]
mod tests {
    use cabbot_core::domain::driver::{DriverPage, DriverQuery, DriverRecord, Vehicle};
    use cabbot_core::domain::session::{Filter, FilterSet};
    use cabbot_core::errors::ConversationError;
    use rust_decimal::Decimal;

    use super::{Reply, CITY_PROMPT};

    fn filters(city: Option<&str>, language: Option<&str>) -> FilterSet {
        let mut set = FilterSet::default();
        set.merge(city.and_then(Filter::city));
        set.merge(language.and_then(Filter::language));
        set
    }

    fn driver() -> DriverRecord {
        DriverRecord {
            id: "drv-1".to_string(),
            name: "Ramesh Kumar".to_string(),
            city: Some("Jaipur".to_string()),
            phone: Some("9800000001".to_string()),
            username: None,
            languages: vec!["Hindi".to_string(), "English".to_string()],
            experience_years: Some(6),
            pet_allowed: Some(true),
            vehicles: vec![Vehicle {
                model: "Dzire".to_string(),
                vehicle_type: "Sedan".to_string(),
                registration: None,
                per_km_cost: Some(Decimal::new(12, 0)),
                commercial: true,
            }],
        }
    }

    #[test]
    fn driver_list_renders_every_driver_with_details() {
        let page = DriverPage {
            query: DriverQuery::from_filters(&filters(Some("jaipur"), Some("hindi")), 1, 5),
            drivers: vec![driver()],
            has_more: true,
        };
        let reply = Reply::Drivers(page);
        let text = reply.text();

        assert_eq!(reply.kind(), "driverList");
        assert!(text.starts_with("🚗 Found 1 driver (city: Jaipur, language: Hindi), page 1:"));
        assert!(text.contains("1. Driver Name: Ramesh Kumar"));
        assert!(text.contains("• City: Jaipur"));
        assert!(text.contains("• Vehicle: Dzire (Sedan), from ₹12/km"));
        assert!(text.contains("• Phone: 📞 9800000001"));
        assert!(text.contains("Type 'more'"));
    }

    #[test]
    fn no_match_names_the_city_and_its_neighbours() {
        let nearby = vec!["Bundi".to_string(), "Jaipur".to_string(), "Ajmer".to_string()];
        let reply = Reply::NoMatch { filters: filters(Some("Kota"), None), nearby };
        assert_eq!(
            reply.text(),
            "No drivers found in Kota. Nearby cities you could try: Bundi, Jaipur, Ajmer."
        );
        assert_eq!(reply.kind(), "text");
    }

    #[test]
    fn no_match_only_offers_what_the_user_can_do() {
        let with_language =
            Reply::NoMatch { filters: filters(Some("Ooty"), Some("Tamil")), nearby: Vec::new() };
        assert_eq!(
            with_language.text(),
            "No drivers found in Ooty who speak Tamil. Say 'any language' to drop the language filter."
        );

        let bare = Reply::NoMatch { filters: filters(Some("Ooty"), None), nearby: Vec::new() };
        assert_eq!(
            bare.text(),
            "No drivers found in Ooty. Try another city, or type 'reset' to start over."
        );
        assert!(!bare.text().contains("nearby"));
    }

    #[test]
    fn city_prompt_mentions_collected_filters() {
        assert_eq!(Reply::NeedCity { filters: FilterSet::default() }.text(), CITY_PROMPT);
        let text = Reply::NeedCity { filters: filters(None, Some("tamil")) }.text();
        assert!(text.starts_with("Got it (language: Tamil)."));
    }

    #[test]
    fn failures_use_user_safe_messages() {
        let timeout = Reply::LookupFailed(ConversationError::LookupTimeout { timeout_secs: 20 });
        assert!(timeout.text().contains("taking too long"));
        assert!(Reply::SessionRecovered.text().contains("started over"));
    }
}
