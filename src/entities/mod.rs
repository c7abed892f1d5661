pub mod commerce;
pub mod order;
pub mod order_item;

pub use commerce::{cart, cart_item, product, product_image};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
