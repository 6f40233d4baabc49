use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::checkout::submit_checkout,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_by_number,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::send_payment_reminder,
        crate::handlers::tracking::track_order,
        crate::handlers::inventory::get_level,
        crate::handlers::inventory::set_level,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::entities::order::OrderStatus,
        crate::entities::order::PaymentStatus,
        crate::services::catalog::CartLine,
        crate::services::checkout::CheckoutRequest,
        crate::services::checkout::CheckoutOutcome,
        crate::services::checkout::PaymentMethod,
        crate::services::orders::OrderResponse,
        crate::services::orders::OrderItemResponse,
        crate::services::pricing::PriceQuote,
        crate::services::payments::PaymentRedirect,
        crate::services::tracker::TrackedOrder,
        crate::services::tracker::TrackedItem,
        crate::handlers::orders::UpdateStatusRequest,
        crate::handlers::inventory::SetLevelRequest,
        crate::handlers::inventory::LevelResponse,
    )),
    tags(
        (name = "Checkout", description = "Cart submission"),
        (name = "Orders", description = "Order lookup and lifecycle management"),
        (name = "Tracking", description = "Public order tracking"),
        (name = "Payments", description = "Payment gateway callbacks"),
        (name = "Inventory", description = "Stock level administration"),
    ),
    info(
        title = "Orderflow API",
        description = "Order lifecycle orchestration: checkout, payment confirmation, inventory and notifications",
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
