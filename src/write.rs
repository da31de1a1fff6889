use crate::error::Error;
use crate::frame::{self, Frame};
use crate::stream::SocketFlowStream;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncWriteExt, WriteHalf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterKind {
    Client,
    Server,
}

pub struct Writer {
    write_half: WriteHalf<SocketFlowStream>,
    kind: WriterKind,
}

impl Writer {
    pub fn new(write_half: WriteHalf<SocketFlowStream>, kind: WriterKind) -> Self {
        Self { write_half, kind }
    }

    /// Writes a single frame, masking it if this writer belongs to a client
    /// (clients must mask, servers must not).
    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), Error> {
        let masked = self.kind == WriterKind::Client;
        let mask = if masked { random_mask() } else { [0u8; 4] };

        let header = frame::encode_header(
            frame.opcode,
            frame.final_fragment,
            masked,
            mask,
            frame.payload.len(),
        );
        self.write_half.write_all(&header).await?;

        if masked {
            let mut payload = frame.payload;
            frame::apply_mask(mask, &mut payload);
            self.write_half.write_all(&payload).await?;
        } else {
            self.write_half.write_all(&frame.payload).await?;
        }

        Ok(())
    }
}

fn random_mask() -> [u8; 4] {
    let mut rng = StdRng::from_rng(rand::thread_rng());
    [
        rng.random::<u8>(),
        rng.random::<u8>(),
        rng.random::<u8>(),
        rng.random::<u8>(),
    ]
}
