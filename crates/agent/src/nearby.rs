use cabbot_core::domain::session::display_case;

/// How many alternatives a no-match reply offers.
pub const MAX_SUGGESTIONS: usize = 3;

/// Cities within a short drive of each other, keyed by lowercase name.
const NEARBY_CITIES: &[(&str, &[&str])] = &[
    ("agra", &["mathura", "firozabad", "bharatpur"]),
    ("ahmedabad", &["gandhinagar", "vadodara", "rajkot"]),
    ("ajmer", &["pushkar", "jaipur", "kishangarh"]),
    ("bangalore", &["mysore", "tumkur", "hosur"]),
    ("bengaluru", &["mysore", "tumkur", "hosur"]),
    ("chennai", &["kanchipuram", "vellore", "pondicherry"]),
    ("delhi", &["gurgaon", "noida", "faridabad", "ghaziabad"]),
    ("gurgaon", &["delhi", "faridabad", "rewari"]),
    ("gurugram", &["delhi", "faridabad", "rewari"]),
    ("hyderabad", &["secunderabad", "warangal", "nizamabad"]),
    ("jaipur", &["ajmer", "alwar", "pushkar"]),
    ("jodhpur", &["pali", "barmer", "jaisalmer"]),
    ("kolkata", &["howrah", "durgapur", "asansol"]),
    ("kota", &["bundi", "jaipur", "ajmer"]),
    ("mumbai", &["thane", "navi mumbai", "kalyan", "panvel"]),
    ("new delhi", &["gurgaon", "noida", "faridabad"]),
    ("noida", &["delhi", "ghaziabad", "greater noida"]),
    ("pune", &["pimpri chinchwad", "nashik", "satara"]),
    ("udaipur", &["chittorgarh", "rajsamand", "jodhpur"]),
];

/// Up to [`MAX_SUGGESTIONS`] nearby cities for `city`, in display case.
pub fn nearby_cities(city: &str) -> Vec<String> {
    let key = city.trim().to_lowercase();
    NEARBY_CITIES
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, nearby)| {
            nearby.iter().take(MAX_SUGGESTIONS).map(|name| display_case(name)).collect()
        })
        .unwrap_or_default()
}
