use log::*;
use websocket_core::error::CloseCode;
use websocket_core::handshake::connect_async;
use websocket_core::message::DataType;

async fn handle_connection(addr: &str) {
    match connect_async(addr).await {
        Ok(connection) => {
            let (_reader, mut writer) = connection.split();

            let parts: [&[u8]; 3] = [b"hello, ", b"fragmented ", b"world"];
            info!("Sending a message across {} fragments", parts.len());

            let result: Result<(), _> = async {
                writer
                    .send_fragmented_start(DataType::Text, parts[0].to_vec())
                    .await?;
                writer
                    .send_fragmented_cont(false, parts[1].to_vec())
                    .await?;
                writer.send_fragmented_cont(true, parts[2].to_vec()).await
            }
            .await;

            if result.is_err() {
                error!("Error occurred when sending data in chunks");
            }

            writer.close_connection(CloseCode::NORMAL).await.unwrap();
        }
        Err(err) => error!("Error when performing handshake: {}", err),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    handle_connection("ws://127.0.0.1:9002").await;
}
