use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::session::FilterSet;

/// Structured request handed to the driver lookup for one turn.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriverQuery {
    pub city: Option<String>,
    pub language: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl DriverQuery {
    pub fn from_filters(filters: &FilterSet, page: u32, page_size: u32) -> Self {
        Self {
            city: filters.city.clone(),
            language: filters.language.clone(),
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.city.as_deref().unwrap_or("").to_lowercase(),
            self.language.as_deref().unwrap_or("").to_lowercase(),
            self.page,
            self.page_size
        )
    }

    pub fn filters(&self) -> FilterSet {
        FilterSet { city: self.city.clone(), language: self.language.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub model: String,
    pub vehicle_type: String,
    pub registration: Option<String>,
    pub per_km_cost: Option<Decimal>,
    pub commercial: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub id: String,
    pub name: String,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub username: Option<String>,
    pub languages: Vec<String>,
    pub experience_years: Option<u32>,
    pub pet_allowed: Option<bool>,
    pub vehicles: Vec<Vehicle>,
}

impl DriverRecord {
    pub fn speaks(&self, language: &str) -> bool {
        self.languages.iter().any(|spoken| spoken.eq_ignore_ascii_case(language.trim()))
    }

    pub fn serves(&self, city: &str) -> bool {
        self.city.as_deref().is_some_and(|own| own.eq_ignore_ascii_case(city.trim()))
    }

    pub fn lowest_per_km_cost(&self) -> Option<Decimal> {
        self.vehicles.iter().filter_map(|vehicle| vehicle.per_km_cost).min()
    }
}

/// One page of lookup results. An empty `drivers` list is "no match", never an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverPage {
    pub query: DriverQuery,
    pub drivers: Vec<DriverRecord>,
    pub has_more: bool,
}

impl DriverPage {
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::driver::{DriverQuery, DriverRecord, Vehicle};
    use crate::domain::session::{Filter, FilterSet};

    fn driver() -> DriverRecord {
        DriverRecord {
            id: "drv-1".to_owned(),
            name: "Ramesh Kumar".to_owned(),
            city: Some("Jaipur".to_owned()),
            phone: Some("9800000001".to_owned()),
            username: Some("ramesh".to_owned()),
            languages: vec!["Hindi".to_owned(), "English".to_owned()],
            experience_years: Some(7),
            pet_allowed: Some(false),
            vehicles: vec![
                Vehicle {
                    model: "Innova".to_owned(),
                    vehicle_type: "SUV".to_owned(),
                    registration: None,
                    per_km_cost: Some(Decimal::new(1_800, 2)),
                    commercial: true,
                },
                Vehicle {
                    model: "Dzire".to_owned(),
                    vehicle_type: "Sedan".to_owned(),
                    registration: None,
                    per_km_cost: Some(Decimal::new(1_200, 2)),
                    commercial: true,
                },
            ],
        }
    }

    #[test]
    fn query_is_built_from_accumulated_filters() {
        let mut filters = FilterSet::default();
        filters.merge(Filter::city("jaipur"));
        filters.merge(Filter::language("hindi"));

        let query = DriverQuery::from_filters(&filters, 0, 5);

        assert_eq!(query.city.as_deref(), Some("Jaipur"));
        assert_eq!(query.language.as_deref(), Some("Hindi"));
        assert_eq!(query.page, 1);
        assert_eq!(query.cache_key(), "jaipur|hindi|1|5");
        assert_eq!(query.filters(), filters);
    }

    #[test]
    fn driver_matching_is_case_insensitive() {
        let record = driver();
        assert!(record.speaks("hindi"));
        assert!(!record.speaks("Tamil"));
        assert!(record.serves(" JAIPUR "));
        assert_eq!(record.lowest_per_km_cost(), Some(Decimal::new(1_200, 2)));
    }
}
