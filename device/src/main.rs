#[cfg(feature = "esp32")]
mod esp;
#[cfg(feature = "esp32")]
mod matrix;
#[cfg(feature = "esp32")]
mod oled;
#[cfg(not(feature = "esp32"))]
mod host;

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}

#[cfg(feature = "esp32")]
fn main() -> anyhow::Result<()> {
    esp::run()
}
