#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    chat_box_lib::run().await
}
