//! In-memory data behind the mock SmartWaste API.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

pub const SEED_PASSWORD: &str = "secret1";

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Location {
    pub fn at(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            address: None,
        }
    }

    /// Equirectangular approximation; accurate enough at city scale.
    pub fn distance_m(&self, other: &Location) -> f64 {
        let mean_lat = ((self.lat + other.lat) / 2.0).to_radians();
        let x = (other.lng - self.lng).to_radians() * mean_lat.cos();
        let y = (other.lat - self.lat).to_radians();
        EARTH_RADIUS_M * (x * x + y * y).sqrt()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub user_type: String,
    pub status: String,
    #[serde(skip)]
    pub password: String,
    #[serde(skip)]
    pub location: Option<Location>,
}

impl UserRecord {
    pub fn permissions(&self) -> Vec<&'static str> {
        match self.user_type.as_str() {
            "admin" => vec!["users:manage", "routes:manage", "analytics:read"],
            "driver" => vec!["routes:update", "bins:collect"],
            _ => vec!["bins:report"],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bin {
    pub bin_id: String,
    pub location: Location,
    pub fill_percentage: u32,
    pub status: String,
    #[serde(rename = "type")]
    pub bin_type: String,
}

impl Bin {
    /// Record a sensor reading and re-derive the status from it.
    pub fn set_fill(&mut self, fill_percentage: u32) {
        self.fill_percentage = fill_percentage;
        self.status = match fill_percentage {
            0 => "empty",
            90.. => "full",
            80..=89 => "needs_collection",
            _ => "normal",
        }
        .to_string();
    }
}

#[derive(Clone, Debug)]
pub struct Vehicle {
    pub vehicle_id: String,
    pub route_id: Option<String>,
    pub location: Location,
    pub status: String,
    pub fuel_level: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct Route {
    pub route_id: String,
    pub vehicle_id: String,
    pub bins: Vec<String>,
    pub completed: Vec<String>,
    pub estimated_time: u32,
    pub estimated_distance: f64,
}

impl Route {
    pub fn is_completed(&self) -> bool {
        self.bins.iter().all(|b| self.completed.contains(b))
    }

    pub fn progress(&self) -> u32 {
        if self.bins.is_empty() {
            return 100;
        }
        let done = self.bins.iter().filter(|b| self.completed.contains(b)).count();
        u32::try_from(done * 100 / self.bins.len()).unwrap_or(100)
    }

    pub fn remaining(&self) -> Vec<&String> {
        self.bins
            .iter()
            .filter(|b| !self.completed.contains(b))
            .collect()
    }

    pub fn status(&self) -> &'static str {
        if self.is_completed() {
            "completed"
        } else if self.completed.is_empty() {
            "assigned"
        } else {
            "in_progress"
        }
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub bins_collected: u32,
    pub waste_collected_kg: f64,
    pub routes_completed: u32,
    pub open_tickets: u32,
}

#[derive(Debug, Default)]
pub struct Store {
    pub users: BTreeMap<String, UserRecord>,
    /// token -> user id
    pub tokens: HashMap<String, String>,
    pub bins: BTreeMap<String, Bin>,
    pub vehicles: HashMap<String, Vehicle>,
    pub routes: BTreeMap<String, Route>,
    pub stats: Stats,
    next_id: u32,
}

impl Store {
    pub fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    pub fn user_by_email(&self, email: &str) -> Option<&UserRecord> {
        self.users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
    }

    /// Demo data: one user per role, three bins around central Kolkata and
    /// one vehicle with a two-bin route.
    pub fn seeded() -> Self {
        let mut store = Store::default();

        for (id, name, email, role) in [
            ("u1", "Asha Admin", "admin@smartwaste.com", "admin"),
            ("u2", "Dev Driver", "driver@smartwaste.com", "driver"),
            ("u3", "Chitra Citizen", "citizen@smartwaste.com", "citizen"),
        ] {
            store.users.insert(
                id.to_string(),
                UserRecord {
                    user_id: id.to_string(),
                    name: name.to_string(),
                    email: email.to_string(),
                    phone: "+91 98300 00000".to_string(),
                    user_type: role.to_string(),
                    status: "active".to_string(),
                    password: SEED_PASSWORD.to_string(),
                    location: Some(Location::at(22.5726, 88.3639)),
                },
            );
        }

        for (id, lat, lng, fill, status, kind) in [
            ("BIN001", 22.5726, 88.3639, 85, "needs_collection", "general"),
            ("BIN002", 22.5750, 88.3660, 40, "normal", "recyclable"),
            ("BIN003", 22.6100, 88.4100, 95, "full", "general"),
        ] {
            store.bins.insert(
                id.to_string(),
                Bin {
                    bin_id: id.to_string(),
                    location: Location::at(lat, lng),
                    fill_percentage: fill,
                    status: status.to_string(),
                    bin_type: kind.to_string(),
                },
            );
        }

        store.vehicles.insert(
            "WB1234".to_string(),
            Vehicle {
                vehicle_id: "WB1234".to_string(),
                route_id: Some("R1".to_string()),
                location: Location::at(22.5700, 88.3600),
                status: "active".to_string(),
                fuel_level: Some(80),
            },
        );
        store.vehicles.insert(
            "WB5678".to_string(),
            Vehicle {
                vehicle_id: "WB5678".to_string(),
                route_id: None,
                location: Location::at(22.5800, 88.3700),
                status: "idle".to_string(),
                fuel_level: Some(55),
            },
        );
        store.routes.insert(
            "R1".to_string(),
            Route {
                route_id: "R1".to_string(),
                vehicle_id: "WB1234".to_string(),
                bins: vec!["BIN001".to_string(), "BIN002".to_string()],
                completed: Vec::new(),
                estimated_time: 95,
                estimated_distance: 12.5,
            },
        );

        store
    }
}
