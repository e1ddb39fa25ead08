use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bookable product families; each has its own markup row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    FlightDomestic,
    FlightInternational,
    Hotel,
    CarRental,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::FlightDomestic => "FLIGHT_DOMESTIC",
            ProductType::FlightInternational => "FLIGHT_INTERNATIONAL",
            ProductType::Hotel => "HOTEL",
            ProductType::CarRental => "CAR_RENTAL",
        }
    }

    pub fn is_flight(&self) -> bool {
        matches!(self, ProductType::FlightDomestic | ProductType::FlightInternational)
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FLIGHT_DOMESTIC" => Ok(ProductType::FlightDomestic),
            "FLIGHT_INTERNATIONAL" => Ok(ProductType::FlightInternational),
            "HOTEL" => Ok(ProductType::Hotel),
            "CAR_RENTAL" => Ok(ProductType::CarRental),
            other => Err(format!("unknown product type: {}", other)),
        }
    }
}

/// External inventory sources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Amadeus,
    Duffel,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Amadeus => "AMADEUS",
            Provider::Duffel => "DUFFEL",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AMADEUS" => Ok(Provider::Amadeus),
            "DUFFEL" => Ok(Provider::Duffel),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}
