use super::*;
use core_library::{
    Album, Artist, Directory, LibraryStore, MemoryLibraryStore, PodcastEpisode, Song,
};
use provider_ampache::tokenize;

const ARTISTS: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<root>
  <artist id="12">
    <name><![CDATA[Metallica]]></name>
    <albumcount>3</albumcount>
    <songcount>40</songcount>
    <genre id="7">Metal</genre>
    <flag>1</flag>
    <rating>4.4</rating>
  </artist>
  <artist id="13">
    <name>Megadeth</name>
    <genre id="7">Metal</genre>
  </artist>
  <artist>
    <name>No id</name>
  </artist>
</root>"#;

async fn decode<B: EntityBuilder>(
    store: &MemoryLibraryStore,
    builder: B,
    body: &str,
) -> (DecodeOutcome, B) {
    let tokens = tokenize(body).unwrap();
    let mut ctx = store.context().await.unwrap();
    let mut decoder = EntityDecoder::new(builder, Some(WaveId(1)));
    let outcome = decoder.decode(&tokens, ctx.as_mut()).await.unwrap();
    ctx.commit().await.unwrap();
    (outcome, decoder.into_builder())
}

#[tokio::test]
async fn test_decodes_fields_and_synthesizes_references() {
    let store = MemoryLibraryStore::new();
    let (outcome, _) = decode(&store, ArtistBuilder, ARTISTS).await;

    assert_eq!(outcome.parsed, 2);
    assert_eq!(outcome.ids, vec!["12", "13"]);

    let artists = store.records::<Artist>().await;
    let metallica = artists.iter().find(|a| a.id == "12").unwrap();
    assert_eq!(metallica.name, "Metallica");
    assert_eq!(metallica.album_count, 3);
    assert_eq!(metallica.song_count, 40);
    assert_eq!(metallica.genre_id.as_deref(), Some("7"));
    assert!(metallica.is_favorite);
    assert_eq!(metallica.rating, 4);
    assert_eq!(metallica.wave_id, Some(WaveId(1)));

    // One synthesized genre shared by both artists
    assert_eq!(store.count(EntityKind::Genre).await, 1);
    let genre = store.snapshot(EntityKind::Genre, "7").await.unwrap();
    assert_eq!(genre.display_name(), "Metal");
}

#[tokio::test]
async fn test_redecoding_is_idempotent() {
    let store = MemoryLibraryStore::new();
    decode(&store, ArtistBuilder, ARTISTS).await;
    let first = store.records::<Artist>().await;

    let (outcome, _) = decode(&store, ArtistBuilder, ARTISTS).await;
    assert_eq!(outcome.parsed, 2);
    assert_eq!(store.records::<Artist>().await, first);
    assert_eq!(store.count(EntityKind::Genre).await, 1);
}

#[tokio::test]
async fn test_existing_entity_keeps_its_wave() {
    let store = MemoryLibraryStore::new();
    decode(&store, ArtistBuilder, ARTISTS).await;

    let tokens = tokenize(ARTISTS).unwrap();
    let mut ctx = store.context().await.unwrap();
    EntityDecoder::new(ArtistBuilder, Some(WaveId(2)))
        .decode(&tokens, ctx.as_mut())
        .await
        .unwrap();
    ctx.commit().await.unwrap();

    for artist in store.records::<Artist>().await {
        assert_eq!(artist.wave_id, Some(WaveId(1)));
    }
}

#[tokio::test]
async fn test_deleted_entity_becomes_available_again() {
    let store = MemoryLibraryStore::new();
    decode(&store, ArtistBuilder, ARTISTS).await;

    let mut ctx = store.context().await.unwrap();
    assert!(ctx.mark_deleted(EntityKind::Artist, "12").await.unwrap());
    ctx.commit().await.unwrap();

    decode(&store, ArtistBuilder, ARTISTS).await;
    let entity = store.snapshot(EntityKind::Artist, "12").await.unwrap();
    assert_eq!(entity.remote_status(), RemoteStatus::Available);
}

#[tokio::test]
async fn test_stub_name_filled_from_later_reference() {
    let store = MemoryLibraryStore::new();
    let body = r#"<root>
        <album id="5"><name>Ride</name><artist id="12"></artist></album>
        <album id="6"><name>Kill</name><artist id="12">Metallica</artist></album>
    </root>"#;
    let (outcome, _) = decode(&store, AlbumBuilder, body).await;
    assert_eq!(outcome.parsed, 2);

    let artist = store.snapshot(EntityKind::Artist, "12").await.unwrap();
    assert_eq!(artist.display_name(), "Metallica");

    let albums = store.records::<Album>().await;
    assert!(albums
        .iter()
        .all(|album| album.artist_id.as_deref() == Some("12")));
}

#[tokio::test]
async fn test_songs_link_album_artist_and_genre() {
    let store = MemoryLibraryStore::new();
    let body = r#"<root>
      <song id="100">
        <title>One</title>
        <artist id="12">Metallica</artist>
        <albumartist id="99">Various</albumartist>
        <album id="5">Justice</album>
        <genre id="7">Metal</genre>
        <track>4</track>
        <time>446</time>
        <size>10700000</size>
        <url>http://host/play/100</url>
      </song>
    </root>"#;
    decode(&store, SongBuilder, body).await;

    let songs = store.records::<Song>().await;
    let song = &songs[0];
    assert_eq!(song.title, "One");
    assert_eq!(song.artist_id.as_deref(), Some("12"));
    assert_eq!(song.album_id.as_deref(), Some("5"));
    assert_eq!(song.genre_id.as_deref(), Some("7"));
    assert_eq!(song.track, 4);
    assert_eq!(song.duration, 446);
    assert_eq!(song.size, 10_700_000);
    assert_eq!(song.url.as_deref(), Some("http://host/play/100"));
    assert!(store.snapshot(EntityKind::Artist, "99").await.is_none());
}

#[tokio::test]
async fn test_default_link_applies_unless_payload_overrides() {
    let store = MemoryLibraryStore::new();
    let body = r#"<root>
        <podcast_episode id="1"><title>Intro</title></podcast_episode>
        <podcast_episode id="2"><title>Other</title><podcast id="9">Else</podcast></podcast_episode>
    </root>"#;
    let tokens = tokenize(body).unwrap();
    let mut ctx = store.context().await.unwrap();
    EntityDecoder::new(PodcastEpisodeBuilder, None)
        .with_link("podcast", "3")
        .decode(&tokens, ctx.as_mut())
        .await
        .unwrap();
    ctx.commit().await.unwrap();

    let episodes = store.records::<PodcastEpisode>().await;
    let podcast_of = |id: &str| {
        episodes
            .iter()
            .find(|e| e.id == id)
            .and_then(|e| e.podcast_id.clone())
    };
    assert_eq!(podcast_of("1").as_deref(), Some("3"));
    assert_eq!(podcast_of("2").as_deref(), Some("9"));
}

#[tokio::test]
async fn test_missing_publish_date_defaults_to_decode_time() {
    use chrono::TimeZone;

    let store = MemoryLibraryStore::new();
    let now = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let body = r#"<root>
        <podcast_episode id="e1"><title>Ep</title></podcast_episode>
        <podcast_episode id="e2"><title>Dated</title><pubdate>2023-01-02T03:04:05+00:00</pubdate></podcast_episode>
    </root>"#;
    let tokens = tokenize(body).unwrap();
    let mut ctx = store.context().await.unwrap();
    EntityDecoder::new(PodcastEpisodeBuilder, None)
        .with_now(now)
        .decode(&tokens, ctx.as_mut())
        .await
        .unwrap();
    ctx.commit().await.unwrap();

    let episodes = store.records::<PodcastEpisode>().await;
    let published = |id: &str| episodes.iter().find(|e| e.id == id).unwrap().publish_date;
    assert_eq!(published("e1"), now);
    assert_eq!(
        published("e2"),
        chrono::Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap()
    );
}

#[tokio::test]
async fn test_playlist_tracks_capture_positions() {
    let store = MemoryLibraryStore::new();
    let body = r#"<root>
        <song id="b"><title>B</title><playlisttrack>2</playlisttrack></song>
        <song id="a"><title>A</title><playlisttrack>1</playlisttrack></song>
        <song id="c"><title>C</title></song>
    </root>"#;
    let (_, builder) = decode(&store, PlaylistTrackBuilder::default(), body).await;
    assert_eq!(
        builder.into_tracks(),
        vec![(2, "b".to_string()), (1, "a".to_string()), (3, "c".to_string())]
    );
}

#[tokio::test]
async fn test_directories_reference_folder_and_parent() {
    let store = MemoryLibraryStore::new();
    let body = r#"<root>
        <directory id="d2"><name>Sub</name><catalog id="1">Music</catalog><parent id="d1">Top</parent></directory>
    </root>"#;
    decode(&store, DirectoryBuilder, body).await;

    let directories = store.records::<Directory>().await;
    let directory = directories.iter().find(|d| d.id == "d2").unwrap();
    assert_eq!(directory.music_folder_id.as_deref(), Some("1"));
    assert_eq!(directory.parent_id.as_deref(), Some("d1"));
    assert_eq!(
        store
            .snapshot(EntityKind::MusicFolder, "1")
            .await
            .unwrap()
            .display_name(),
        "Music"
    );
}

#[tokio::test]
async fn test_empty_document_parses_nothing() {
    let store = MemoryLibraryStore::new();
    let (outcome, _) = decode(&store, ArtistBuilder, "<root></root>").await;
    assert!(outcome.is_empty());
    assert_eq!(store.count(EntityKind::Artist).await, 0);
}
