use thiserror::Error;

/// Ошибки обращения к панели x-ui.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("Авторизация в панели не удалась: {0}")]
    Authentication(String),
    #[error("Панель недоступна после {attempts} попыток: {message}")]
    TransientNetwork { attempts: u32, message: String },
    /// Текст `msg` из ответа панели без изменений.
    #[error("{0}")]
    RemoteOperation(String),
    #[error("Панель ответила статусом {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("Некорректный ответ панели: {0}")]
    Decode(String),
    #[error("Клиент не найден: {0}")]
    NotFound(String),
    #[error("Ошибка HTTP-клиента: {0}")]
    Http(#[from] reqwest::Error),
}
