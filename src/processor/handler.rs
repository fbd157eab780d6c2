#[cfg(test)]
use mockall::automock;

use crate::ConnectRequest;
use crate::ConnectResponse;
use crate::ConnectionId;
use crate::FourLetterWord;
use crate::OutboundSender;
use crate::RequestFrame;
use crate::ServerMessage;
use crate::SessionId;

/// The one entry point both transports funnel into.
///
/// Implementations do their own synchronisation, so a transport may call
/// these from any number of threads or tasks without locking.
#[cfg_attr(test, automock)]
pub trait RequestHandler: Send + Sync + 'static {
    /// Called for every accepted socket; `false` refuses it.
    fn connection_opened(
        &self,
        connection_id: ConnectionId,
    ) -> bool;

    /// Opens or resumes a session and binds it to the connection's outbound
    /// queue. An expired response tells the transport to close the socket.
    fn connect(
        &self,
        connection_id: ConnectionId,
        request: ConnectRequest,
        outbound: OutboundSender,
    ) -> ConnectResponse;

    /// Runs one request and returns the reply to queue behind any watch
    /// events the request itself triggered.
    fn process(
        &self,
        session_id: SessionId,
        frame: RequestFrame,
    ) -> ServerMessage;

    /// The socket is gone. The session, if any, lives on until it times out.
    fn connection_closed(
        &self,
        connection_id: ConnectionId,
        session_id: Option<SessionId>,
    );

    /// Plain-text answer to a status word
    fn four_letter(
        &self,
        word: FourLetterWord,
    ) -> String;

    /// Largest frame body a connection may send
    fn max_frame_len(&self) -> usize;
}
