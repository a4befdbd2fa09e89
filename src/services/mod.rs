pub mod photo_service;
