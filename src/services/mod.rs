pub mod catalog;
pub mod checkout;
pub mod customers;
pub mod inventory;
pub mod notifications;
pub mod order_state;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod tracker;
