use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    services::{
        catalog::ProductResolver,
        checkout::CheckoutService,
        customers::CustomerLedger,
        inventory::InventoryLedger,
        order_state::OrderStateMachine,
        orders::OrderService,
        payments::PaymentGateway,
        pricing::PricingEngine,
        tracker::OrderTracker,
    },
};

pub mod checkout;
pub mod inventory;
pub mod orders;
pub mod payment_webhooks;
pub mod tracking;

/// Wired-up service graph shared by every handler.
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub state_machine: Arc<OrderStateMachine>,
    pub tracker: Arc<OrderTracker>,
    pub inventory: Arc<InventoryLedger>,
    pub customers: Arc<CustomerLedger>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        event_sender: EventSender,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Result<Self, ServiceError> {
        let pricing = PricingEngine::from_config(config)?;

        let orders = Arc::new(OrderService::new(db.clone()));
        let resolver = Arc::new(ProductResolver::new(db.clone()));
        let customers = Arc::new(CustomerLedger::new(db.clone()));
        let inventory = Arc::new(InventoryLedger::new(db.clone()));
        let tracker = Arc::new(OrderTracker::new(orders.clone()));
        let state_machine = Arc::new(OrderStateMachine::new(
            db.clone(),
            orders.clone(),
            inventory.clone(),
            event_sender.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            resolver,
            pricing,
            orders.clone(),
            customers.clone(),
            gateway,
            event_sender,
            config.currency.clone(),
        ));

        Ok(Self {
            orders,
            checkout,
            state_machine,
            tracker,
            inventory,
            customers,
        })
    }
}
