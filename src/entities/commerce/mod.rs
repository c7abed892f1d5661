pub mod cart;
pub mod cart_item;
pub mod product;
pub mod product_image;

pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_image::{Entity as ProductImage, Model as ProductImageModel};
