pub mod economy;
pub mod marketplace;
pub mod messages;
pub mod relay;
