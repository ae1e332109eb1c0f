// ABOUTME: RPCMux - turns the asynchronous channel-0 method stream into synchronous calls (§4.6)
// ABOUTME: One oneshot pair per call, registered before the request is written (§5)

use std::future::Future;
use std::sync::Mutex;

use tokio::sync::{broadcast, oneshot};

use crate::method::{Method, MethodTag};

use super::error::{Error, ErrorKind};

/// Multiplexes channel-0 RPC: the Dispatcher hands every non-distinguished
/// method to [`RPCMux::deliver`]; at most one call is ever in flight, so a
/// single slot (rather than a buffered queue) is enough to hold the waiting
/// sender.
pub struct RPCMux {
    pending: Mutex<Option<oneshot::Sender<Method>>>,
    errors: broadcast::Sender<Error>,
}

impl RPCMux {
    pub fn new() -> Self {
        let (errors, _) = broadcast::channel(1);
        Self {
            pending: Mutex::new(None),
            errors,
        }
    }

    /// Delivers a channel-0 method arriving off the wire to whichever call is
    /// currently waiting. If nobody is waiting the method is dropped: the
    /// core never buffers more than one outstanding response.
    pub fn deliver(&self, method: Method) {
        if let Some(tx) = self.pending.lock().unwrap().take() {
            let _ = tx.send(method);
        }
    }

    /// Unblocks any in-flight call with `err`. Called once by shutdown (§4.10
    /// step 3); safe to call with nobody listening.
    pub fn fail_all(&self, err: Error) {
        let _ = self.errors.send(err);
        self.pending.lock().unwrap().take();
    }

    /// Registers a one-shot slot, optionally writes the request, then waits
    /// for either a matching response or a shutdown error. A response whose
    /// tag is not in `expected` fails with `command_invalid`.
    pub async fn call<F>(&self, write_request: Option<F>, expected: &[MethodTag]) -> Result<Method, Error>
    where
        F: Future<Output = Result<(), Error>>,
    {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().unwrap() = Some(tx);
        let mut err_rx = self.errors.subscribe();

        if let Some(write) = write_request {
            if let Err(e) = write.await {
                self.pending.lock().unwrap().take();
                return Err(e);
            }
        }

        tokio::select! {
            received = rx => {
                let method = received.map_err(|_| {
                    Error::new(ErrorKind::Closed, 0, "connection closed while awaiting rpc response")
                })?;
                if expected.contains(&method.tag()) {
                    Ok(method)
                } else {
                    Err(Error::command_invalid(format!(
                        "unexpected response tag {:?}, wanted one of {expected:?}",
                        method.tag()
                    )))
                }
            }
            Ok(err) = err_rx.recv() => Err(err),
        }
    }
}

impl Default for RPCMux {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok_write() -> Result<(), Error> {
        Ok(())
    }

    #[tokio::test]
    async fn call_resolves_when_matching_response_is_delivered() {
        let mux = std::sync::Arc::new(RPCMux::new());
        let mux2 = mux.clone();
        let handle = tokio::spawn(async move {
            mux2.call(Some(ok_write()), &[MethodTag::ConnectionOpenOk]).await
        });

        tokio::task::yield_now().await;
        mux.deliver(Method::ConnectionOpenOk);

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, Method::ConnectionOpenOk);
    }

    #[tokio::test]
    async fn mismatched_response_yields_command_invalid() {
        let mux = std::sync::Arc::new(RPCMux::new());
        let mux2 = mux.clone();
        let handle = tokio::spawn(async move {
            mux2.call(Some(ok_write()), &[MethodTag::ConnectionOpenOk]).await
        });

        tokio::task::yield_now().await;
        mux.deliver(Method::ConnectionCloseOk);

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::CommandInvalid);
    }

    #[tokio::test]
    async fn fail_all_unblocks_an_in_flight_call() {
        let mux = std::sync::Arc::new(RPCMux::new());
        let mux2 = mux.clone();
        let handle = tokio::spawn(async move {
            mux2.call(Some(ok_write()), &[MethodTag::ConnectionOpenOk]).await
        });

        tokio::task::yield_now().await;
        mux.fail_all(Error::closed("connection shutting down"));

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Closed);
    }

    #[tokio::test]
    async fn deliver_with_nobody_waiting_is_a_no_op() {
        let mux = RPCMux::new();
        mux.deliver(Method::ConnectionOpenOk);
    }
}
