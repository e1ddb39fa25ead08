pub mod currency;
pub mod pricing;
pub mod search;
pub mod voucher;

pub use ebt_shared::{ProductType, Provider};
pub use currency::{ConversionBreakdown, CurrencyConverter, InMemoryRateCache, RateCache, RateSource, StaticRateSource};
pub use pricing::{InMemoryMarkupConfigs, MarkupConfig, MarkupConfigRepository, PriceBreakdown, PricingEngine};
pub use search::{PricedOffer, SearchService};
pub use voucher::{DiscountRule, Voucher, VoucherEngine};
